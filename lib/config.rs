//! Engine shape constants and their loading from TOML.

use std::path::Path;
use serde::{ Deserialize, Serialize };
use crate::error::{ GrapeError, GrapeResult };

fn default_dt() -> f64 { 1.0 }

/// Fixed configuration of an [`Engine`][crate::engine::Engine].
///
/// Every field except `dt` is a shape constant: it sizes the buffers owned by
/// the engine and cannot change for the lifetime of an instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hilbert space dimension.
    pub dim: usize,
    /// Number of control channels.
    pub nctrls: usize,
    /// Number of timesteps in the pulse.
    pub plen: usize,
    /// Number of independent trajectories.
    pub nstate: usize,
    /// Nonzero capacity of each sparse operator.
    pub maxnnz: usize,
    /// Truncation order of the Taylor series.
    pub taylor_order: usize,
    /// Timestep multiplying every generator.
    #[serde(default = "default_dt")]
    pub dt: f64,
}

impl EngineConfig {
    /// Read a configuration from a TOML file.
    pub fn load<P>(path: P) -> GrapeResult<Self>
    where P: AsRef<Path>
    {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string and validate it.
    pub fn from_toml(content: &str) -> GrapeResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GrapeResult<()> {
        let nonzero = [
            ("dim", self.dim),
            ("nctrls", self.nctrls),
            ("plen", self.plen),
            ("nstate", self.nstate),
            ("maxnnz", self.maxnnz),
            ("taylor_order", self.taylor_order),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, n)| *n == 0) {
            return Err(GrapeError::InvalidConfig(
                format!("{} must be > 0", name)));
        }
        if !self.dt.is_finite() || self.dt < 0.0 {
            return Err(GrapeError::InvalidConfig(
                format!("dt must be finite and non-negative, got {}", self.dt)));
        }
        Ok(())
    }

    /// Return the shape constants.
    pub fn shape(&self) -> Shape {
        Shape {
            dim: self.dim,
            nctrls: self.nctrls,
            plen: self.plen,
            nstate: self.nstate,
            maxnnz: self.maxnnz,
            taylor_order: self.taylor_order,
        }
    }
}

/// Snapshot of the shape constants, for sizing caller-side buffers.
///
/// The `*_len` methods give lengths of the flat `f64` buffers accepted and
/// returned by the engine, where complex numbers occupy two adjacent entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    pub dim: usize,
    pub nctrls: usize,
    pub plen: usize,
    pub nstate: usize,
    pub maxnnz: usize,
    pub taylor_order: usize,
}

impl Shape {
    /// Flat length of a batch of states, `(nstate, dim)` complex.
    pub fn states_len(&self) -> usize { 2 * self.nstate * self.dim }

    /// Flat length of one full trajectory role, `(nstate, plen + 1, dim)`
    /// complex.
    pub fn trajectory_len(&self) -> usize {
        2 * self.nstate * (self.plen + 1) * self.dim
    }

    /// Flat length of a pulse schedule, `(plen, nctrls)` real.
    pub fn pulse_len(&self) -> usize { self.plen * self.nctrls }

    /// Flat length of a gradient buffer, `(nstate, plen, nctrls)` real.
    pub fn grad_len(&self) -> usize { self.nstate * self.plen * self.nctrls }
}
