//! Pre-shared key lifecycle for the CREST device simulator.
//!
//! This crate owns everything that touches key material:
//! - Parsing `PSK:<key>:<hash>[:SET]` downlink tokens
//! - The live single-identity key store consulted by the transport handshake
//! - The persisted key table (one row per revision)
//! - The rotation state machine (prepare, verify, activate, invalidate)
//!
//! # Rotation Protocol
//!
//! 1. `PSK:<key>:<hash>` arrives; the hash is checked against the active
//!    secret and a PENDING revision is written. The live key is untouched.
//! 2. `PSK:<key>:<hash>:SET` arrives; the key and hash are checked against the
//!    pending revision. Nothing is written.
//! 3. The engine transmits the `PSK:SET` confirmation under the old key and
//!    only then calls [`PskService::activate_key`], which swaps ACTIVE and
//!    PENDING in one transaction and updates the live key.

pub mod error;
pub mod extractor;
pub mod repository;
pub mod service;
pub mod store;

pub use error::{PskError, PskResult};
pub use extractor::{extract_hash, extract_key, PskCommand};
pub use repository::{PreSharedKey, PskRepository, PskStatus};
pub use service::{rotation_hash, PskService};
pub use store::{PskCredentials, PskStore};
