use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::model::Conversation;
use crate::schema::conversations;

use super::Store;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = conversations)]
pub struct ConversationRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            session_id: row.session_id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
struct NewConversation {
    id: Uuid,
    session_id: Uuid,
}

impl Store {
    /// Returns the most recently created conversation for `session_id`, or
    /// creates one if none exists (spec §3: exactly one "current"
    /// conversation per session — the most recently created).
    pub fn get_or_create_current_conversation(&self, session_id: Uuid) -> Result<Conversation> {
        let mut conn = self.lock()?;

        let existing: Option<ConversationRow> = conversations::table
            .filter(conversations::session_id.eq(session_id))
            .order(conversations::created_at.desc())
            .select(ConversationRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("failed to query conversation")?;

        if let Some(row) = existing {
            return Ok(row.into());
        }

        let new_id = Uuid::new_v4();
        diesel::insert_into(conversations::table)
            .values(&NewConversation {
                id: new_id,
                session_id,
            })
            .execute(&mut *conn)
            .context("failed to insert conversation")?;

        let now = Utc::now();
        Ok(Conversation {
            id: new_id,
            session_id,
            title: None,
            created_at: now,
            updated_at: now,
        })
    }
}
