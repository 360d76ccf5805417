//! Error types for PSK operations.

use thiserror::Error;

/// Errors that can occur while parsing, storing or rotating keys.
#[derive(Debug, Error)]
pub enum PskError {
    /// Token does not have the `PSK:<16 chars>:<64 hex>[:SET]` shape
    #[error("Command did not match psk (set) command")]
    InvalidPskFormat,

    /// Supplied hash does not match SHA-256(secret ++ key)
    #[error("PSK hash for identity {identity} did not match")]
    InvalidPskHash { identity: String },

    /// Key in the SET confirmation differs from the pending key
    #[error("Key in PSK:SET does not match pending key for identity {identity}")]
    InvalidPskEquality { identity: String },

    #[error("No active psk for identity: {identity}")]
    NoActiveKey { identity: String },

    #[error("No pending psk for identity: {identity}")]
    NoPendingKey { identity: String },

    /// Activation requested without both an ACTIVE and a PENDING row
    #[error("No current or new psk for identity {identity}, impossible to change active key")]
    NoRotationInFlight { identity: String },

    /// Stored status text is not a known status
    #[error("Unknown psk status in key table: {0}")]
    UnknownStatus(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for PSK operations.
pub type PskResult<T> = Result<T, PskError>;
