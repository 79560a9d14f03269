//! Collection of pre-defined systems.

pub mod qubit_cavity;
