//! Relational store (spec §3, §6 Persisted state).
//!
//! One `Store` wraps a single shared connection behind a mutex, grounded on
//! `storage.rs`'s `MessageStore` and `scheduler.rs`'s `SchedulerDb` — both
//! hold `Arc<Mutex<PgConnection>>` rather than pooling, so every entity's
//! CRUD lives in its own file as an `impl Store` block sharing that handle.

mod connections;
mod conversations;
mod messages;
mod preferences;
mod sessions;
mod users;

pub use connections::ConnectionRow;
pub use conversations::ConversationRow;
pub use messages::MessageRow;
pub use preferences::PreferenceRow;
pub use sessions::SessionRow;
pub use users::UserRow;

use anyhow::{Context, Result};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared relational store. Retries on initial connect with exponential
/// backoff (spec §5: base 1s, factor 2, max 3 attempts); operational
/// failures after that are surfaced to the caller without retry.
pub struct Store {
    conn: Arc<Mutex<PgConnection>>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl Store {
    pub fn connect(database_url: &str) -> Result<Self> {
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);
        loop {
            match PgConnection::establish(database_url) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Arc::new(Mutex::new(conn)),
                    })
                }
                Err(e) if attempt < 2 => {
                    tracing::warn!(
                        "database connect attempt {} failed: {} - retrying in {:?}",
                        attempt + 1,
                        e,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).context("failed to connect to database after 3 attempts");
                }
            }
        }
    }

    pub fn run_migrations(&self) -> Result<()> {
        use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
        const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migration failed: {}", e))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PgConnection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))
    }

    /// Exposes the shared connection to sibling modules (`vector.rs`) that
    /// query tables outside the per-entity CRUD files here.
    pub(crate) fn raw_connection(&self) -> Result<std::sync::MutexGuard<'_, PgConnection>> {
        self.lock()
    }
}
