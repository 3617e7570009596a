//! Infrastructure: transport implementation, configuration, logging.

pub mod config;
pub mod logging;
pub mod transport;
