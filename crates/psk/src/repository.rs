//! Persisted key table.
//!
//! One row per `(identity, revision)`. Rows are never deleted; a revision is
//! superseded only by changing its status. Two partial unique indexes let
//! SQLite itself enforce "at most one ACTIVE" and "at most one PENDING" row per
//! identity, and every multi-row change runs in a single transaction so a crash
//! cannot leave zero or two ACTIVE rows behind.

use crate::error::{PskError, PskResult};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Lifecycle status of a key revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PskStatus {
    /// Key currently used for the transport handshake
    Active,
    /// Former active key, retained for audit
    Inactive,
    /// Proposed key awaiting confirmation
    Pending,
    /// Rejected proposal, retained for audit
    Invalid,
}

impl PskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PskStatus::Active => "ACTIVE",
            PskStatus::Inactive => "INACTIVE",
            PskStatus::Pending => "PENDING",
            PskStatus::Invalid => "INVALID",
        }
    }
}

impl FromStr for PskStatus {
    type Err = PskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(PskStatus::Active),
            "INACTIVE" => Ok(PskStatus::Inactive),
            "PENDING" => Ok(PskStatus::Pending),
            "INVALID" => Ok(PskStatus::Invalid),
            other => Err(PskError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for PskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One revision of a device's pre-shared key.
#[derive(Clone, PartialEq, Eq)]
pub struct PreSharedKey {
    pub identity: String,
    pub revision: u32,
    pub key: String,
    /// Fixed at provisioning and copied into every later revision.
    pub secret: String,
    pub status: PskStatus,
}

impl std::fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSharedKey")
            .field("identity", &self.identity)
            .field("revision", &self.revision)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

const SELECT_COLUMNS: &str = "SELECT identity, revision, psk, secret, status FROM pre_shared_key";

/// Key table backed by SQLite.
pub struct PskRepository {
    conn: Connection,
}

impl PskRepository {
    /// Create or open the key table at the specified path
    pub fn open(path: impl AsRef<Path>) -> PskResult<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening psk key table");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open a throwaway key table, used by tests and dry runs.
    pub fn open_in_memory() -> PskResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> PskResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pre_shared_key (
                identity TEXT NOT NULL,
                revision INTEGER NOT NULL CHECK (revision >= 0),
                psk TEXT NOT NULL,
                secret TEXT NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('ACTIVE', 'INACTIVE', 'PENDING', 'INVALID')),
                PRIMARY KEY (identity, revision)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_psk_single_active
                ON pre_shared_key(identity) WHERE status = 'ACTIVE';
            CREATE UNIQUE INDEX IF NOT EXISTS idx_psk_single_pending
                ON pre_shared_key(identity) WHERE status = 'PENDING';
            "#,
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<(PreSharedKey, String)> {
        Ok((
            PreSharedKey {
                identity: row.get(0)?,
                revision: row.get(1)?,
                key: row.get(2)?,
                secret: row.get(3)?,
                // Placeholder, replaced once the status text is validated.
                status: PskStatus::Invalid,
            },
            row.get(4)?,
        ))
    }

    fn with_status((mut psk, status): (PreSharedKey, String)) -> PskResult<PreSharedKey> {
        psk.status = status.parse()?;
        Ok(psk)
    }

    pub fn insert(&self, psk: &PreSharedKey) -> PskResult<()> {
        self.conn.execute(
            "INSERT INTO pre_shared_key (identity, revision, psk, secret, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![psk.identity, psk.revision, psk.key, psk.secret, psk.status.as_str()],
        )?;
        debug!(
            identity = %psk.identity,
            revision = psk.revision,
            status = %psk.status,
            "Stored psk revision"
        );
        Ok(())
    }

    /// Highest-revision row for `identity` with the given status.
    pub fn find_latest(&self, identity: &str, status: PskStatus) -> PskResult<Option<PreSharedKey>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE identity = ?1 AND status = ?2 ORDER BY revision DESC LIMIT 1"
                ),
                params![identity, status.as_str()],
                Self::map_row,
            )
            .optional()?;
        raw.map(Self::with_status).transpose()
    }

    /// Every revision for `identity`, oldest first.
    pub fn revisions(&self, identity: &str) -> PskResult<Vec<PreSharedKey>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE identity = ?1 ORDER BY revision ASC"))?;
        let rows = stmt
            .query_map(params![identity], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::with_status).collect()
    }

    /// Next unused revision number for `identity`.
    pub fn next_revision(&self, identity: &str) -> PskResult<u32> {
        let max: Option<u32> = self.conn.query_row(
            "SELECT MAX(revision) FROM pre_shared_key WHERE identity = ?1",
            params![identity],
            |row| row.get(0),
        )?;
        Ok(max.map_or(0, |revision| revision + 1))
    }

    /// Change the status of one revision. Returns false when no row matched.
    pub fn update_status(&self, identity: &str, revision: u32, status: PskStatus) -> PskResult<bool> {
        let changed = self.conn.execute(
            "UPDATE pre_shared_key SET status = ?3 WHERE identity = ?1 AND revision = ?2",
            params![identity, revision, status.as_str()],
        )?;
        Ok(changed == 1)
    }

    /// Insert a new PENDING revision derived from `active`, invalidating any
    /// pending proposal it supersedes. Runs as one transaction.
    pub fn insert_pending(&mut self, active: &PreSharedKey, key: &str) -> PskResult<PreSharedKey> {
        let tx = self.conn.transaction()?;

        let superseded = tx.execute(
            "UPDATE pre_shared_key SET status = 'INVALID' WHERE identity = ?1 AND status = 'PENDING'",
            params![active.identity],
        )?;

        let max: Option<u32> = tx.query_row(
            "SELECT MAX(revision) FROM pre_shared_key WHERE identity = ?1",
            params![active.identity],
            |row| row.get(0),
        )?;
        let pending = PreSharedKey {
            identity: active.identity.clone(),
            revision: max.map_or(active.revision + 1, |revision| revision + 1),
            key: key.to_string(),
            secret: active.secret.clone(),
            status: PskStatus::Pending,
        };

        tx.execute(
            "INSERT INTO pre_shared_key (identity, revision, psk, secret, status)
             VALUES (?1, ?2, ?3, ?4, 'PENDING')",
            params![pending.identity, pending.revision, pending.key, pending.secret],
        )?;
        tx.commit()?;

        debug!(
            identity = %pending.identity,
            revision = pending.revision,
            superseded,
            "Stored pending psk revision"
        );
        Ok(pending)
    }

    /// Atomically move `active_revision` to INACTIVE and `pending_revision` to
    /// ACTIVE. Either both rows change or neither does.
    pub fn swap_active(
        &mut self,
        identity: &str,
        active_revision: u32,
        pending_revision: u32,
    ) -> PskResult<()> {
        let tx = self.conn.transaction()?;

        let retired = tx.execute(
            "UPDATE pre_shared_key SET status = 'INACTIVE'
             WHERE identity = ?1 AND revision = ?2 AND status = 'ACTIVE'",
            params![identity, active_revision],
        )?;
        let promoted = tx.execute(
            "UPDATE pre_shared_key SET status = 'ACTIVE'
             WHERE identity = ?1 AND revision = ?2 AND status = 'PENDING'",
            params![identity, pending_revision],
        )?;

        if retired != 1 || promoted != 1 {
            // Dropping the transaction rolls back the partial update.
            return Err(PskError::NoRotationInFlight {
                identity: identity.to_string(),
            });
        }

        tx.commit()?;
        Ok(())
    }
}
