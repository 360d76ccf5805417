//! Live single-identity key store.
//!
//! Cheap to clone; all clones share the same key. The transport snapshots
//! [`PskCredentials`] when it opens a session, so a key swap never affects a
//! session that is already in flight.

use std::sync::{Arc, RwLock};
use zeroize::Zeroizing;

/// Identity and key handed to the handshake layer for one session.
#[derive(Clone)]
pub struct PskCredentials {
    pub identity: String,
    pub key: Zeroizing<String>,
}

impl std::fmt::Debug for PskCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskCredentials")
            .field("identity", &self.identity)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct PskStore {
    identity: Arc<str>,
    key: Arc<RwLock<Zeroizing<String>>>,
}

impl PskStore {
    pub fn new(identity: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            identity: Arc::from(identity.into()),
            key: Arc::new(RwLock::new(Zeroizing::new(key.into()))),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn key(&self) -> Zeroizing<String> {
        let guard = self.key.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone()
    }

    /// Replace the live key. The previous value is wiped on drop.
    pub fn set_key(&self, key: impl Into<String>) {
        let mut guard = self.key.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Zeroizing::new(key.into());
    }

    pub fn credentials(&self) -> PskCredentials {
        PskCredentials {
            identity: self.identity.to_string(),
            key: self.key(),
        }
    }
}

impl std::fmt::Debug for PskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskStore")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
