#![allow(non_snake_case)]

//! Truncated-Taylor propagation and analytic control gradients for GRAPE
//! pulse optimization on sparse multilevel systems.

pub mod utils;
pub mod error;
pub mod config;
pub mod sparse;
pub mod store;
pub mod propagate;
pub mod trajectory;
pub mod cost;
pub mod engine;

pub use ndarray_npy;
pub use config::{ EngineConfig, Shape };
pub use engine::{ Engine, Role, StepOutput };
pub use error::{ GrapeError, GrapeResult };
pub use sparse::CsrOperator;
pub use store::{ Direction, HamiltonianStore, Term };
