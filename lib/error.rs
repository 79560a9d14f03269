//! Error type for configuration and shape violations.
//!
//! Everything here is detected before any numeric work starts; the propagation
//! math itself has no failure path.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrapeError {
    /// An operator holds more nonzero elements than the configured capacity.
    #[error("operator has {nnz} nonzero elements, exceeding capacity {maxnnz}")]
    CapacityExceeded { nnz: usize, maxnnz: usize },

    /// A supplied buffer or operator doesn't match a configured shape constant.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Compressed-row structure violates its invariants.
    #[error("malformed compressed-row operator: {0}")]
    MalformedOperator(String),

    #[error("control channel {0} out of range for {1} channels")]
    ChannelOutOfRange(usize, usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("initial and target states have not been loaded")]
    StatesNotLoaded,

    #[error("couldn't read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("couldn't parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type GrapeResult<T> = Result<T, GrapeError>;

impl GrapeError {
    pub(crate) fn mismatch(what: &'static str, expected: usize, actual: usize)
        -> Self
    {
        Self::DimensionMismatch { what, expected, actual }
    }
}
