//! Simulated CREST device.
//!
//! Holds the mutable device state, the telemetry envelope built from it and
//! the downlink command handlers that mutate it.

pub mod error;
pub mod handlers;
pub mod message;
pub mod state;

pub use error::{CommandError, EnvelopeError};
pub use handlers::{CommandContext, CommandHandler, Handler, HandlerRegistry};
pub use message::{DeviceId, DeviceMessage, INVALID_CBOR_MESSAGE};
pub use state::{AlarmThresholdValues, SimulatorState, Urc};
