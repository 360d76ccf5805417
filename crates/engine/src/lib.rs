//! Send loop of the CREST device simulator.
//!
//! Each cycle builds the telemetry envelope, posts it through a [`Transport`],
//! activates a confirmed key once the confirmation has left the device and
//! dispatches the downlinks found in the response.

pub mod client;
pub mod coap;
pub mod engine;
pub mod error;
pub mod transport;

pub use client::{CoapEndpoint, CoapTransport};
pub use engine::{parse_response_body, BurstScheduler, CycleOutcome, EngineConfig, ProtocolEngine, ResponseBody};
pub use error::{TransportError, TransportResult};
pub use transport::{ResponseCode, Transport, TransportResponse};
