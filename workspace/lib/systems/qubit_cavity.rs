//! Transmon qubit dispersively coupled to a truncated cavity mode, with I/Q
//! drives on both.
//!
//! States are ordered `|q, n⟩ → q * nfock + n` for qubit level `q ∈ {g, e}`
//! and photon number `n < nfock`. Frequencies are in MHz and times in μs; all
//! Hamiltonians are returned in angular units.

use std::f64::consts::TAU;
use itertools::iproduct;
use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use serde::Deserialize;
use taylor_grape::{ Direction, EngineConfig, GrapeResult, HamiltonianStore, Term };

/// Number of drive channels.
pub const NCTRLS: usize = 4;

/// Magnitude below which dense matrix entries are dropped.
pub const SPARSE_TOL: f64 = 1e-12;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    QubitI,
    QubitQ,
    CavityI,
    CavityQ,
}

impl Control {
    pub const ALL: [Self; NCTRLS]
        = [Self::QubitI, Self::QubitQ, Self::CavityI, Self::CavityQ];

    pub fn channel(self) -> usize {
        match self {
            Self::QubitI => 0,
            Self::QubitQ => 1,
            Self::CavityI => 2,
            Self::CavityQ => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct QubitCavity {
    /// Cavity Fock levels kept.
    pub nfock: usize,
    /// Dispersive shift per photon when the qubit is excited (MHz).
    pub chi: f64,
    /// Cavity self-Kerr (MHz).
    #[serde(default)]
    pub kerr: f64,
    /// Qubit frequency relative to the drive frame (MHz).
    #[serde(default)]
    pub qubit_detuning: f64,
}

fn sigma_x() -> nd::Array2<C64> {
    let o = C64::new(0.0, 0.0);
    let l = C64::new(1.0, 0.0);
    nd::array![[o, l], [l, o]]
}

fn sigma_y() -> nd::Array2<C64> {
    let o = C64::new(0.0, 0.0);
    let i = C64::new(0.0, 1.0);
    nd::array![[o, -i], [i, o]]
}

impl QubitCavity {
    pub fn dim(&self) -> usize { 2 * self.nfock }

    pub fn index(&self, q: usize, n: usize) -> usize { q * self.nfock + n }

    /// Basis vector `|q, n⟩`.
    ///
    /// *Panics* if `q > 1` or `n >= nfock`.
    pub fn state(&self, q: usize, n: usize) -> nd::Array1<C64> {
        assert!(q < 2 && n < self.nfock, "QubitCavity::state: out of range");
        let mut psi: nd::Array1<C64> = nd::Array1::zeros(self.dim());
        psi[self.index(q, n)] = C64::new(1.0, 0.0);
        psi
    }

    /// Cavity annihilation operator.
    pub fn annihilator(&self) -> nd::Array2<C64> {
        let mut a: nd::Array2<C64> = nd::Array2::zeros((self.nfock, self.nfock));
        (1..self.nfock)
            .for_each(|n| { a[[n - 1, n]] = C64::new((n as f64).sqrt(), 0.0); });
        a
    }

    /// Diagonal drift Hamiltonian
    /// ```text
    /// H_0 = 2π (δ + χ n) |e⟩⟨e| + 2π (K / 2) n (n - 1)
    /// ```
    pub fn drift(&self) -> nd::Array2<C64> {
        let mut H: nd::Array2<C64> = nd::Array2::zeros((self.dim(), self.dim()));
        for (q, n) in iproduct!(0..2_usize, 0..self.nfock) {
            let nf = n as f64;
            let e = q as f64 * (self.qubit_detuning + self.chi * nf)
                + 0.5 * self.kerr * nf * (nf - 1.0);
            let k = self.index(q, n);
            H[[k, k]] = C64::new(TAU * e, 0.0);
        }
        H
    }

    /// Drive Hamiltonian for unit (1 MHz) amplitude on one channel.
    pub fn control(&self, ctrl: Control) -> nd::Array2<C64> {
        let id_q: nd::Array2<C64> = nd::Array2::eye(2);
        let id_c: nd::Array2<C64> = nd::Array2::eye(self.nfock);
        let a = self.annihilator();
        let ad = a.t().to_owned();
        let op = match ctrl {
            Control::QubitI => kron(&sigma_x(), &id_c),
            Control::QubitQ => kron(&sigma_y(), &id_c),
            Control::CavityI => kron(&id_q, &(&a + &ad)),
            Control::CavityQ => kron(&id_q, &(&ad - &a).mapv(|x| x * C64::i())),
        };
        op.mapv(|x| x * (TAU / 2.0))
    }

    /// Build a generator store for `config` with forward generators `-i H`
    /// and mirrored backward generators.
    pub fn build_store(&self, config: &EngineConfig) -> GrapeResult<HamiltonianStore> {
        let mut store = HamiltonianStore::new(config);
        store.set_hamiltonian(Direction::Forward, Term::Drift, &self.drift(), SPARSE_TOL)?;
        for ctrl in Control::ALL {
            store.set_hamiltonian(
                Direction::Forward,
                Term::Control(ctrl.channel()),
                &self.control(ctrl),
                SPARSE_TOL,
            )?;
        }
        store.mirror_backward();
        Ok(store)
    }
}
