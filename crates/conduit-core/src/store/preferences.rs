use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::user_preferences;

use super::Store;

/// Well-known preference keys (supplemental, spec §6's persisted-state list
/// names `user_preferences` without detailing it), grounded on the
/// teacher's `memory/db.rs` `preference_keys` constants.
pub mod preference_keys {
    pub const TIMEZONE: &str = "timezone";
    pub const LOCALE: &str = "locale";
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = user_preferences)]
pub struct PreferenceRow {
    pub id: Uuid,
    pub user_id: String,
    pub key: String,
    pub value: String,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = user_preferences)]
struct NewPreference<'a> {
    id: Uuid,
    user_id: &'a str,
    key: &'a str,
    value: &'a str,
}

impl Store {
    pub fn set_preference(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        let mut conn = self.lock()?;

        diesel::insert_into(user_preferences::table)
            .values(&NewPreference {
                id: Uuid::new_v4(),
                user_id,
                key,
                value,
            })
            .on_conflict((user_preferences::user_id, user_preferences::key))
            .do_update()
            .set((
                user_preferences::value.eq(value),
                user_preferences::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .context("failed to upsert preference")?;

        Ok(())
    }

    pub fn get_preference(&self, user_id: &str, key: &str) -> Result<Option<String>> {
        let mut conn = self.lock()?;

        user_preferences::table
            .filter(user_preferences::user_id.eq(user_id))
            .filter(user_preferences::key.eq(key))
            .select(user_preferences::value)
            .first(&mut *conn)
            .optional()
            .context("failed to query preference")
    }
}
