//! Key rotation state machine.
//!
//! ```text
//!   prepare (hash ok)          activate (after PSK:SET was sent)
//!  ─────────────────► PENDING ───────────────────────────────► ACTIVE
//!                        │                                        │
//!                        │ invalidate / superseded                │ next activation
//!                        ▼                                        ▼
//!                     INVALID                                  INACTIVE
//! ```

use crate::error::{PskError, PskResult};
use crate::extractor::PskCommand;
use crate::repository::{PreSharedKey, PskRepository, PskStatus};
use crate::store::PskStore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Lowercase hex SHA-256 of `secret` followed by `key`.
pub fn rotation_hash(secret: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Owns the key table for one identity and keeps the live store in sync.
pub struct PskService {
    repository: PskRepository,
    store: PskStore,
}

impl PskService {
    pub fn new(repository: PskRepository, store: PskStore) -> Self {
        Self { repository, store }
    }

    pub fn store(&self) -> &PskStore {
        &self.store
    }

    pub fn identity(&self) -> &str {
        self.store.identity()
    }

    /// Make sure an ACTIVE row exists and load it into the store.
    ///
    /// An identity with no rows gets revision 0 built from `initial_key` and
    /// `secret`. An identity that already has an ACTIVE row keeps it and the
    /// configured key is ignored.
    pub fn provision(&mut self, initial_key: &str, secret: &str) -> PskResult<PreSharedKey> {
        let identity = self.identity().to_string();

        if let Some(active) = self.repository.find_latest(&identity, PskStatus::Active)? {
            info!(
                identity = %identity,
                revision = active.revision,
                "Loaded active psk from key table"
            );
            self.store.set_key(active.key.clone());
            return Ok(active);
        }

        let revision = self.repository.next_revision(&identity)?;
        if revision > 0 {
            warn!(
                identity = %identity,
                revision,
                "Key table has history but no active key, provisioning from configuration"
            );
        }

        let active = PreSharedKey {
            identity: identity.clone(),
            revision,
            key: initial_key.to_string(),
            secret: secret.to_string(),
            status: PskStatus::Active,
        };
        self.repository.insert(&active)?;
        self.store.set_key(initial_key);

        info!(identity = %identity, revision, "Provisioned initial psk");
        Ok(active)
    }

    /// Validate a `PSK:<key>:<hash>` proposal against the active secret and
    /// persist it as the PENDING revision. The live key is left untouched.
    pub fn prepare_pending_key(&mut self, command: &str) -> PskResult<PreSharedKey> {
        let identity = self.identity().to_string();
        let active = self
            .repository
            .find_latest(&identity, PskStatus::Active)?
            .ok_or_else(|| PskError::NoActiveKey {
                identity: identity.clone(),
            })?;

        let parsed = PskCommand::parse(command)?;
        if rotation_hash(&active.secret, parsed.key) != parsed.hash {
            warn!(identity = %identity, "Rejected psk proposal with invalid hash");
            return Err(PskError::InvalidPskHash { identity });
        }

        let pending = self.repository.insert_pending(&active, parsed.key)?;
        info!(
            identity = %identity,
            revision = pending.revision,
            active_revision = active.revision,
            "Prepared pending psk"
        );
        Ok(pending)
    }

    /// Check a `PSK:<key>:<hash>:SET` confirmation against the PENDING row.
    /// No state changes here; activation happens after the confirmation is sent.
    pub fn verify_pending_key(&self, command: &str) -> PskResult<()> {
        let identity = self.identity().to_string();
        let pending = self
            .repository
            .find_latest(&identity, PskStatus::Pending)?
            .ok_or_else(|| PskError::NoPendingKey {
                identity: identity.clone(),
            })?;

        let parsed = PskCommand::parse(command)?;
        if parsed.key != pending.key {
            warn!(identity = %identity, revision = pending.revision, "Confirmed psk differs from pending psk");
            return Err(PskError::InvalidPskEquality { identity });
        }
        if rotation_hash(&pending.secret, parsed.key) != parsed.hash {
            warn!(identity = %identity, revision = pending.revision, "Rejected psk confirmation with invalid hash");
            return Err(PskError::InvalidPskHash { identity });
        }

        debug!(identity = %identity, revision = pending.revision, "Verified pending psk");
        Ok(())
    }

    /// Promote PENDING to ACTIVE, retire the old ACTIVE row and switch the
    /// live store to the new key.
    pub fn activate_key(&mut self) -> PskResult<PreSharedKey> {
        let identity = self.identity().to_string();
        let no_rotation = || PskError::NoRotationInFlight {
            identity: identity.clone(),
        };

        let active = self
            .repository
            .find_latest(&identity, PskStatus::Active)?
            .ok_or_else(no_rotation)?;
        let mut pending = self
            .repository
            .find_latest(&identity, PskStatus::Pending)?
            .ok_or_else(no_rotation)?;

        self.repository
            .swap_active(&identity, active.revision, pending.revision)?;
        self.store.set_key(pending.key.clone());
        pending.status = PskStatus::Active;

        info!(
            identity = %identity,
            revision = pending.revision,
            retired_revision = active.revision,
            "Activated psk"
        );
        Ok(pending)
    }

    /// Mark the PENDING row INVALID. Returns false when there was none.
    pub fn set_pending_key_as_invalid(&self) -> PskResult<bool> {
        let identity = self.identity();
        let Some(pending) = self.repository.find_latest(identity, PskStatus::Pending)? else {
            debug!(identity = %identity, "No pending psk to invalidate");
            return Ok(false);
        };

        self.repository
            .update_status(identity, pending.revision, PskStatus::Invalid)?;
        info!(identity = %identity, revision = pending.revision, "Invalidated pending psk");
        Ok(true)
    }

    pub fn has_pending_key(&self) -> PskResult<bool> {
        Ok(self
            .repository
            .find_latest(self.identity(), PskStatus::Pending)?
            .is_some())
    }

    /// Full rotation history for this identity, ordered by revision.
    pub fn revisions(&self) -> PskResult<Vec<PreSharedKey>> {
        self.repository.revisions(self.identity())
    }
}

impl std::fmt::Debug for PskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskService")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
