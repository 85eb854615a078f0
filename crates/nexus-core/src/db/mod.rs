// ============================================================================
// SessionDb — Embedded Database (redb)
// ============================================================================
// Durable storage for the persisted wallet session.
// Default path: ~/.nexus/session.redb (override via NEXUS_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::PersistedSession;

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed namespace the wallet session is stored under
pub const SESSION_NAMESPACE: &str = "nexus-wallet-storage";

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Embedded database for wallet sessions
pub struct SessionDb {
    db: Database,
    path: PathBuf,
}

impl SessionDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses NEXUS_DB_PATH env var or ~/.nexus/session.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("NEXUS_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let nexus_dir = home.join(".nexus");
            std::fs::create_dir_all(&nexus_dir)
                .map_err(|e| anyhow!("Failed to create .nexus directory: {}", e))?;
            nexus_dir.join("session.redb")
        };

        info!("Opening session database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to create sessions table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_session(&self, namespace: &str, session: &PersistedSession) -> Result<()> {
        let value = serde_json::to_vec(session)
            .map_err(|e| anyhow!("Failed to serialize session: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
            table.insert(namespace, value.as_slice())
                .map_err(|e| anyhow!("Failed to insert session: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored session under {}", namespace);
        Ok(())
    }

    pub fn load_session(&self, namespace: &str) -> Result<Option<PersistedSession>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(SESSIONS)
            .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;

        match table.get(namespace).map_err(|e| anyhow!("Failed to get session: {}", e))? {
            Some(value) => {
                let session: PersistedSession = serde_json::from_slice(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize session: {}", e))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub fn clear_session(&self, namespace: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
            removed = table.remove(namespace)
                .map_err(|e| anyhow!("Failed to remove session: {}", e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Cleared session under {}", namespace);
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) fn temp_db() -> SessionDb {
    let path = std::env::temp_dir().join(format!("nexus-test-{}.redb", uuid::Uuid::new_v4()));
    SessionDb::open(path.to_str()).unwrap()
}
