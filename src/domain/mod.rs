//! Domain layer: models, ports, and errors.

pub mod error;
pub mod models;
pub mod ports;
