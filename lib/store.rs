//! Storage for the drift and control generators of both evolution directions.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    config::EngineConfig,
    error::{ GrapeError, GrapeResult },
    sparse::CsrOperator,
};

/// Direction of evolution a generator set belongs to.
///
/// The forward set evolves initial states toward their targets; the backward
/// set evolves targets back toward the initial states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Backward => 1,
        }
    }
}

/// A single term of the total generator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    /// Always-on part, weighted only by the timestep.
    Drift,
    /// Control channel, weighted by its amplitude at each timestep.
    Control(usize),
}

/// Per-direction drift and control generators.
///
/// All operators share the configured dimension and hold at most `maxnnz`
/// entries; both are checked whenever an operator is inserted. Channels that
/// were never set act as the zero operator.
///
/// Operators are stored as *generators* `G`, the matrix actually exponentiated
/// over one step as `exp(dt * G)`. Use [`Self::set_hamiltonian`] to insert a
/// Hamiltonian `H` as `G = -i H`.
#[derive(Clone, Debug)]
pub struct HamiltonianStore {
    dim: usize,
    maxnnz: usize,
    controls: [Vec<CsrOperator>; 2],
    drift: [Option<CsrOperator>; 2],
}

impl HamiltonianStore {
    /// Create a store of zero operators sized by `config`.
    pub fn new(config: &EngineConfig) -> Self {
        let zeros = vec![CsrOperator::zeros(config.dim); config.nctrls];
        Self {
            dim: config.dim,
            maxnnz: config.maxnnz,
            controls: [zeros.clone(), zeros],
            drift: [None, None],
        }
    }

    pub fn dim(&self) -> usize { self.dim }

    pub fn nctrls(&self) -> usize { self.controls[0].len() }

    pub fn maxnnz(&self) -> usize { self.maxnnz }

    fn check(&self, op: &CsrOperator) -> GrapeResult<()> {
        if op.dim() != self.dim {
            return Err(GrapeError::mismatch("operator dimension", self.dim, op.dim()));
        }
        if op.nnz() > self.maxnnz {
            return Err(GrapeError::CapacityExceeded {
                nnz: op.nnz(),
                maxnnz: self.maxnnz,
            });
        }
        Ok(())
    }

    /// Insert a generator.
    pub fn set(&mut self, dir: Direction, term: Term, op: CsrOperator)
        -> GrapeResult<()>
    {
        self.check(&op)?;
        match term {
            Term::Drift => {
                self.drift[dir.index()] = Some(op);
            },
            Term::Control(c) => {
                let nctrls = self.nctrls();
                let slot = self.controls[dir.index()].get_mut(c)
                    .ok_or(GrapeError::ChannelOutOfRange(c, nctrls))?;
                *slot = op;
            },
        }
        Ok(())
    }

    /// Insert a dense Hamiltonian `H` as the generator `-i H`, dropping
    /// entries with modulus at most `tol`.
    pub fn set_hamiltonian(
        &mut self,
        dir: Direction,
        term: Term,
        H: &nd::Array2<C64>,
        tol: f64,
    ) -> GrapeResult<()>
    {
        let op = CsrOperator::from_dense(H, tol)?.scaled(-C64::i());
        self.set(dir, term, op)
    }

    /// Fill the backward direction with the negated forward generators, so
    /// that backward evolution undoes forward evolution for a fixed pulse.
    pub fn mirror_backward(&mut self) {
        let neg = C64::new(-1.0, 0.0);
        self.controls[1]
            = self.controls[0].iter().map(|op| op.scaled(neg)).collect();
        self.drift[1] = self.drift[0].as_ref().map(|op| op.scaled(neg));
    }

    /// Return the generator for a control channel.
    ///
    /// *Panics* if `c` is out of range.
    pub fn control(&self, dir: Direction, c: usize) -> &CsrOperator {
        &self.controls[dir.index()][c]
    }

    pub fn drift(&self, dir: Direction) -> Option<&CsrOperator> {
        self.drift[dir.index()].as_ref()
    }

    /// Check that the store was built for the same shape constants as
    /// `config`.
    pub fn check_config(&self, config: &EngineConfig) -> GrapeResult<()> {
        if self.dim != config.dim {
            return Err(GrapeError::mismatch("store dimension", config.dim, self.dim));
        }
        if self.nctrls() != config.nctrls {
            return Err(GrapeError::mismatch(
                "store control channels", config.nctrls, self.nctrls()));
        }
        if self.maxnnz != config.maxnnz {
            return Err(GrapeError::mismatch(
                "store nonzero capacity", config.maxnnz, self.maxnnz));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            dim: 2,
            nctrls: 2,
            plen: 4,
            nstate: 1,
            maxnnz: 2,
            taylor_order: 4,
            dt: 0.1,
        }
    }

    fn sigma_x() -> nd::Array2<C64> {
        nd::array![
            [C64::new(0.0, 0.0), C64::new(1.0, 0.0)],
            [C64::new(1.0, 0.0), C64::new(0.0, 0.0)],
        ]
    }

    #[test]
    fn hamiltonian_becomes_generator() {
        let mut store = HamiltonianStore::new(&config());
        store.set_hamiltonian(Direction::Forward, Term::Control(1), &sigma_x(), 0.0)
            .unwrap();
        let g = store.control(Direction::Forward, 1).to_dense();
        assert_eq!(g[[0, 1]], C64::new(0.0, -1.0));
        assert_eq!(g[[1, 0]], C64::new(0.0, -1.0));
        assert_eq!(store.control(Direction::Forward, 0).nnz(), 0);
        assert_eq!(store.control(Direction::Backward, 1).nnz(), 0);
    }

    #[test]
    fn capacity_enforced() {
        let mut store = HamiltonianStore::new(&config());
        let full: nd::Array2<C64> = nd::Array2::from_elem((2, 2), C64::new(1.0, 0.0));
        match store.set_hamiltonian(Direction::Forward, Term::Drift, &full, 0.0) {
            Err(GrapeError::CapacityExceeded { nnz, maxnnz }) => {
                assert_eq!(nnz, 4);
                assert_eq!(maxnnz, 2);
            },
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }
        assert!(store.drift(Direction::Forward).is_none());
    }

    #[test]
    fn shape_enforced() {
        let mut store = HamiltonianStore::new(&config());
        assert!(matches!(
            store.set(Direction::Forward, Term::Control(0), CsrOperator::zeros(3)),
            Err(GrapeError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.set(Direction::Forward, Term::Control(2), CsrOperator::zeros(2)),
            Err(GrapeError::ChannelOutOfRange(2, 2))
        ));
    }

    #[test]
    fn mirror_negates() {
        let mut store = HamiltonianStore::new(&config());
        store.set_hamiltonian(Direction::Forward, Term::Control(0), &sigma_x(), 0.0)
            .unwrap();
        store.set_hamiltonian(Direction::Forward, Term::Drift, &sigma_x(), 0.0)
            .unwrap();
        store.mirror_backward();
        let fwd = store.control(Direction::Forward, 0).to_dense();
        let bwd = store.control(Direction::Backward, 0).to_dense();
        assert_eq!(bwd, fwd.mapv(|x| -x));
        assert!(store.drift(Direction::Backward).is_some());
    }

    #[test]
    fn config_check() {
        let store = HamiltonianStore::new(&config());
        assert!(store.check_config(&config()).is_ok());
        let other = EngineConfig { nctrls: 3, ..config() };
        assert!(store.check_config(&other).is_err());
    }
}
