use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::{AppConnection, ConnectionStatus};
use crate::schema::app_connections;

use super::Store;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = app_connections)]
pub struct ConnectionRow {
    pub id: Uuid,
    pub user_id: String,
    pub app_name: String,
    pub broker_account_id: String,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<ConnectionRow> for AppConnection {
    type Error = anyhow::Error;

    fn try_from(row: ConnectionRow) -> Result<Self> {
        Ok(AppConnection {
            id: row.id,
            user_id: row.user_id,
            app_name: row.app_name,
            broker_account_id: row.broker_account_id,
            status: row.status.parse::<ConnectionStatus>()?,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = app_connections)]
struct NewConnection<'a> {
    id: Uuid,
    user_id: &'a str,
    app_name: &'a str,
    broker_account_id: &'a str,
    status: &'a str,
}

impl Store {
    /// The sole mutating operation on the Connection Registry state machine
    /// (spec §4.8): idempotent per `(user_id, app_name)`.
    pub fn upsert_connection(
        &self,
        user_id: &str,
        app_name: &str,
        broker_account_id: &str,
        status: ConnectionStatus,
    ) -> Result<AppConnection> {
        let mut conn = self.lock()?;

        diesel::insert_into(app_connections::table)
            .values(&NewConnection {
                id: Uuid::new_v4(),
                user_id,
                app_name,
                broker_account_id,
                status: status.as_str(),
            })
            .on_conflict((app_connections::user_id, app_connections::app_name))
            .do_update()
            .set((
                app_connections::broker_account_id.eq(broker_account_id),
                app_connections::status.eq(status.as_str()),
                app_connections::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .context("failed to upsert connection")?;

        let row: ConnectionRow = app_connections::table
            .filter(app_connections::user_id.eq(user_id))
            .filter(app_connections::app_name.eq(app_name))
            .select(ConnectionRow::as_select())
            .first(&mut *conn)
            .context("failed to reload upserted connection")?;

        AppConnection::try_from(row)
    }

    pub fn get_connection(&self, user_id: &str, app_name: &str) -> Result<Option<AppConnection>> {
        let mut conn = self.lock()?;

        let row: Option<ConnectionRow> = app_connections::table
            .filter(app_connections::user_id.eq(user_id))
            .filter(app_connections::app_name.eq(app_name))
            .select(ConnectionRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("failed to query connection")?;

        row.map(AppConnection::try_from).transpose()
    }

    /// `getUserConnections(userId, status)` (spec §4.8): `appName -> accountId`.
    pub fn user_connections(
        &self,
        user_id: &str,
        status: ConnectionStatus,
    ) -> Result<HashMap<String, String>> {
        let mut conn = self.lock()?;

        let rows: Vec<ConnectionRow> = app_connections::table
            .filter(app_connections::user_id.eq(user_id))
            .filter(app_connections::status.eq(status.as_str()))
            .select(ConnectionRow::as_select())
            .load(&mut *conn)
            .context("failed to query user connections")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.app_name, r.broker_account_id))
            .collect())
    }

    /// All connections in `{ACTIVE, INITIATED}` for the reconciliation
    /// background job (spec §4.8 supplemental, `maintenance.rs`).
    pub fn reconcilable_connections(&self) -> Result<Vec<AppConnection>> {
        let mut conn = self.lock()?;

        let rows: Vec<ConnectionRow> = app_connections::table
            .filter(
                app_connections::status
                    .eq(ConnectionStatus::Active.as_str())
                    .or(app_connections::status.eq(ConnectionStatus::Initiated.as_str())),
            )
            .select(ConnectionRow::as_select())
            .load(&mut *conn)
            .context("failed to query reconcilable connections")?;

        rows.into_iter().map(AppConnection::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiated_and_active_are_usable() {
        assert!(ConnectionStatus::Initiated.is_usable());
        assert!(ConnectionStatus::Active.is_usable());
        assert!(!ConnectionStatus::Inactive.is_usable());
        assert!(!ConnectionStatus::Failed.is_usable());
        assert!(!ConnectionStatus::Expired.is_usable());
    }
}
