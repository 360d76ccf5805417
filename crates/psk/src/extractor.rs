//! Key and hash extraction from PSK downlink tokens.

use crate::error::{PskError, PskResult};
use regex::Regex;
use std::sync::LazyLock;

/// Full-token shape: key (group 1), hash (group 2), optional `:SET` (group 3).
static PSK_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PSK:([a-zA-Z0-9]{16}):([0-9a-fA-F]{64})(:SET)?$").expect("invalid psk pattern")
});

/// A parsed PSK or PSK SET token.
#[derive(Clone, PartialEq, Eq)]
pub struct PskCommand<'a> {
    pub key: &'a str,
    pub hash: &'a str,
    /// True for the `:SET` confirmation form.
    pub confirm: bool,
}

impl<'a> PskCommand<'a> {
    pub fn parse(command: &'a str) -> PskResult<Self> {
        let captures = PSK_COMMAND
            .captures(command)
            .ok_or(PskError::InvalidPskFormat)?;
        match (captures.get(1), captures.get(2)) {
            (Some(key), Some(hash)) => Ok(Self {
                key: key.as_str(),
                hash: hash.as_str(),
                confirm: captures.get(3).is_some(),
            }),
            _ => Err(PskError::InvalidPskFormat),
        }
    }
}

impl std::fmt::Debug for PskCommand<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskCommand")
            .field("key", &"****************")
            .field("hash", &self.hash)
            .field("confirm", &self.confirm)
            .finish()
    }
}

pub fn extract_key(command: &str) -> PskResult<&str> {
    PskCommand::parse(command).map(|parsed| parsed.key)
}

pub fn extract_hash(command: &str) -> PskResult<&str> {
    PskCommand::parse(command).map(|parsed| parsed.hash)
}
