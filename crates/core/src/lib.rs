//! Core functionality for the CREST device simulator.
//!
//! This crate provides the configuration surface, logging initialisation and
//! shared error type used across the simulator workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{LogFormat, SimulatorConfig};
pub use error::{CoreError, Result};
