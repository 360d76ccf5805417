use crest_psk::PskError;
use thiserror::Error;

/// Errors raised while applying a downlink command.
///
/// Grammar and security failures are recovered inside the handlers and turned
/// into failure URCs; these variants cover what is left.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A handler was invoked with a token it does not own
    #[error("{handler} command handler can not handle command: {command}")]
    Unsupported {
        handler: &'static str,
        command: String,
    },

    #[error("Alarm thresholds for channel {channel} not present")]
    MissingThresholds { channel: u8 },

    /// Key table failure while recovering from a rejected rotation
    #[error("Key store error: {0}")]
    Key(#[from] PskError),
}

/// Telemetry envelope encoding failure.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("CBOR encoding failed: {0}")]
    Encode(String),
}
