//! Connection Registry state machine (spec §4.8).
//!
//! `store::connections` holds the idempotent upsert primitive; this module
//! owns the allowed transitions between `ConnectionStatus` variants and maps
//! broker responses onto them, grounded on `storage.rs`'s thin
//! wrapper-over-Diesel style (a small struct holding a `Store` plus whatever
//! external client it needs to reconcile state).

use anyhow::Result;

use crate::error::CoreError;
use crate::model::{AppConnection, ConnectionStatus};
use crate::store::Store;
use conduit_tools::broker::BrokerClient;

pub struct ConnectionRegistry {
    store: Store,
    broker: BrokerClient,
}

impl ConnectionRegistry {
    pub fn new(store: Store, broker: BrokerClient) -> Self {
        Self { store, broker }
    }

    /// Starts (or resumes) a connection attempt: INITIATED is the only
    /// status a fresh `initiate()` call can produce (spec §4.8).
    pub async fn initiate(&self, user_id: &str, app_name: &str) -> Result<AppConnection, CoreError> {
        let account = self
            .broker
            .initiate(app_name, user_id)
            .await
            .map_err(CoreError::from)?;

        let status = broker_status_to_connection_status(&account.status);
        self.store
            .upsert_connection(user_id, app_name, &account.id, status)
            .map_err(CoreError::Fatal)
    }

    /// Re-initiates a connection currently in `INACTIVE` or `EXPIRED`
    /// (spec §4.8: "INACTIVE/EXPIRED -> INITIATED" is the only transition
    /// out of those terminal-looking states).
    pub async fn reinitiate(
        &self,
        user_id: &str,
        app_name: &str,
        redirect_uri: &str,
    ) -> Result<AppConnection, CoreError> {
        let existing = self
            .store
            .get_connection(user_id, app_name)
            .map_err(CoreError::Fatal)?
            .ok_or_else(|| CoreError::Validation(format!("no connection for app {}", app_name)))?;

        if !matches!(
            existing.status,
            ConnectionStatus::Inactive | ConnectionStatus::Expired
        ) {
            return Err(CoreError::Validation(format!(
                "connection for {} is {:?}, not eligible for reinitiate",
                app_name, existing.status
            )));
        }

        let account = self
            .broker
            .reinitiate(&existing.broker_account_id, redirect_uri)
            .await
            .map_err(CoreError::from)?;

        let status = broker_status_to_connection_status(&account.status);
        self.store
            .upsert_connection(user_id, app_name, &account.id, status)
            .map_err(CoreError::Fatal)
    }

    /// Handles the broker's OAuth callback: promotes `INITIATED -> ACTIVE`
    /// on status `ACTIVE` (spec §4.8), or records whatever other status the
    /// broker reports, via the same idempotent upsert every other
    /// transition uses.
    pub fn callback(
        &self,
        connected_account_id: &str,
        user_id: &str,
        app_name: &str,
        status: &str,
    ) -> Result<AppConnection, CoreError> {
        let status = broker_status_to_connection_status(status);
        self.store
            .upsert_connection(user_id, app_name, connected_account_id, status)
            .map_err(CoreError::Fatal)
    }

    /// Polls the broker for the current status of one connection and
    /// reconciles the stored row if it drifted (the unit the background
    /// reconciliation job in `maintenance.rs` calls per connection).
    pub async fn reconcile_one(&self, connection: &AppConnection) -> Result<AppConnection, CoreError> {
        let account = self
            .broker
            .get(&connection.broker_account_id)
            .await
            .map_err(CoreError::from)?;

        let status = broker_status_to_connection_status(&account.status);
        self.store
            .upsert_connection(
                &connection.user_id,
                &connection.app_name,
                &account.id,
                status,
            )
            .map_err(CoreError::Fatal)
    }

    pub fn get(&self, user_id: &str, app_name: &str) -> Result<Option<AppConnection>, CoreError> {
        self.store.get_connection(user_id, app_name).map_err(CoreError::Fatal)
    }

    /// `getUserConnections(userId)` restricted to connections usable for
    /// routing (spec §4.8: only ACTIVE connections are routed to by default;
    /// INITIATED is surfaced separately so the caller can prompt for auth).
    pub fn usable_connections(
        &self,
        user_id: &str,
    ) -> Result<std::collections::HashMap<String, String>, CoreError> {
        self.store
            .user_connections(user_id, ConnectionStatus::Active)
            .map_err(CoreError::Fatal)
    }
}

fn broker_status_to_connection_status(status: &str) -> ConnectionStatus {
    match status.to_ascii_uppercase().as_str() {
        "ACTIVE" | "ACTIVATED" => ConnectionStatus::Active,
        "INITIATED" | "INITIALIZING" | "PENDING" => ConnectionStatus::Initiated,
        "FAILED" | "ERROR" => ConnectionStatus::Failed,
        "EXPIRED" => ConnectionStatus::Expired,
        _ => ConnectionStatus::Inactive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_status_maps_known_values() {
        assert_eq!(broker_status_to_connection_status("ACTIVE"), ConnectionStatus::Active);
        assert_eq!(broker_status_to_connection_status("initiated"), ConnectionStatus::Initiated);
        assert_eq!(broker_status_to_connection_status("FAILED"), ConnectionStatus::Failed);
        assert_eq!(broker_status_to_connection_status("EXPIRED"), ConnectionStatus::Expired);
    }

    #[test]
    fn broker_status_defaults_to_inactive() {
        assert_eq!(broker_status_to_connection_status("SOMETHING_NEW"), ConnectionStatus::Inactive);
    }
}
