use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::model::{ConversationSummary, Session};
use crate::schema::sessions;

use super::Store;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = sessions)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: String,
    pub token: Option<String>,
    pub started_at: chrono::DateTime<Utc>,
    pub last_activity_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub is_active: bool,
    pub conversation_summary: Option<serde_json::Value>,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        let conversation_summary = row
            .conversation_summary
            .map(serde_json::from_value)
            .transpose()
            .context("failed to parse stored conversation summary")?;

        Ok(Session {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            started_at: row.started_at,
            last_activity_at: row.last_activity_at,
            updated_at: row.updated_at,
            is_active: row.is_active,
            conversation_summary,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
struct NewSession<'a> {
    id: Uuid,
    user_id: &'a str,
}

impl Store {
    /// Finds a usable session for `(user_id, session_id?)`, creating one if
    /// needed (spec §4.1). If `session_id` belongs to a different user, a
    /// new session is created and the mismatch logged.
    pub fn get_or_create_session(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
    ) -> Result<Session> {
        let mut conn = self.lock()?;

        if let Some(id) = session_id {
            let existing: Option<SessionRow> = sessions::table
                .filter(sessions::id.eq(id))
                .select(SessionRow::as_select())
                .first(&mut *conn)
                .optional()
                .context("failed to query session")?;

            if let Some(row) = existing {
                if row.user_id != user_id {
                    tracing::warn!(
                        "session {} belongs to user {}, not requesting user {} - creating new session",
                        id,
                        row.user_id,
                        user_id
                    );
                } else {
                    diesel::update(sessions::table.filter(sessions::id.eq(id)))
                        .set((
                            sessions::last_activity_at.eq(Utc::now()),
                            sessions::is_active.eq(true),
                        ))
                        .execute(&mut *conn)
                        .context("failed to refresh session activity")?;
                    return Session::try_from(row);
                }
            }
        }

        let new_id = Uuid::new_v4();
        diesel::insert_into(sessions::table)
            .values(&NewSession {
                id: new_id,
                user_id,
            })
            .execute(&mut *conn)
            .context("failed to insert session")?;

        let now = Utc::now();
        Ok(Session {
            id: new_id,
            user_id: user_id.to_string(),
            token: None,
            started_at: now,
            last_activity_at: now,
            updated_at: now,
            is_active: true,
            conversation_summary: None,
        })
    }

    /// Overwrites the session's single conversation-summary slot
    /// (spec §4.5 step 3: last-write-wins).
    pub fn update_session_summary(
        &self,
        session_id: Uuid,
        summary: &ConversationSummary,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let summary_json = serde_json::to_value(summary)?;

        diesel::update(sessions::table.filter(sessions::id.eq(session_id)))
            .set((
                sessions::conversation_summary.eq(summary_json),
                sessions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .context("failed to update session summary")?;

        Ok(())
    }

    /// Deactivates sessions whose `last_activity_at` is older than the given
    /// cutoff (spec §3 Session lifecycle: >30-day-inactive cleanup).
    /// Returns the number of sessions deactivated.
    pub fn deactivate_stale_sessions(&self, cutoff: chrono::DateTime<Utc>) -> Result<usize> {
        let mut conn = self.lock()?;

        let updated = diesel::update(
            sessions::table
                .filter(sessions::is_active.eq(true))
                .filter(sessions::last_activity_at.lt(cutoff)),
        )
        .set(sessions::is_active.eq(false))
        .execute(&mut *conn)
        .context("failed to deactivate stale sessions")?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_row_with_null_summary_converts_to_none() {
        let now = Utc::now();
        let row = SessionRow {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            token: None,
            started_at: now,
            last_activity_at: now,
            updated_at: now,
            is_active: true,
            conversation_summary: None,
        };
        let session = Session::try_from(row).unwrap();
        assert!(session.conversation_summary.is_none());
    }
}
