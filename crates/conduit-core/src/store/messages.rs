use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::model::{ComprehensiveAnalysis, ExecutedTool, Message, MessageRole};
use crate::schema::messages;

use super::Store;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<serde_json::Value>,
    pub analysis: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let role = row.role.parse::<MessageRole>()?;
        let tool_calls: Option<Vec<ExecutedTool>> = row
            .tool_calls
            .map(serde_json::from_value)
            .transpose()
            .context("failed to parse stored tool_calls")?;
        let analysis: Option<ComprehensiveAnalysis> = row
            .analysis
            .map(serde_json::from_value)
            .transpose()
            .context("failed to parse stored analysis")?;

        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            tool_calls,
            analysis,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessage {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    tool_calls: Option<serde_json::Value>,
    analysis: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
}

impl Store {
    /// Appends a message; ordering within a conversation is by `created_at`,
    /// ties broken by insertion order (spec §3, §8 invariant 1).
    #[allow(clippy::too_many_arguments)]
    pub fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        tool_calls: Option<&[ExecutedTool]>,
        analysis: Option<&ComprehensiveAnalysis>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        let mut conn = self.lock()?;
        let id = Uuid::new_v4();

        let new_message = NewMessage {
            id,
            conversation_id,
            role: role.as_str().to_string(),
            content: content.to_string(),
            tool_calls: tool_calls.map(serde_json::to_value).transpose()?,
            analysis: analysis.map(serde_json::to_value).transpose()?,
            metadata,
        };

        diesel::insert_into(messages::table)
            .values(&new_message)
            .execute(&mut *conn)
            .context("failed to insert message")?;

        Ok(id)
    }

    /// Returns the last `limit` messages for `conversation_id`, oldest-first
    /// (spec §4.1 `loadHistory`).
    pub fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> Result<Vec<Message>> {
        let mut conn = self.lock()?;

        let mut rows: Vec<MessageRow> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order(messages::created_at.desc())
            .limit(limit)
            .select(MessageRow::as_select())
            .load(&mut *conn)
            .context("failed to query recent messages")?;

        rows.reverse();
        rows.into_iter().map(Message::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_row_with_invalid_role_fails_conversion() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role: "bogus".to_string(),
            content: "hi".to_string(),
            tool_calls: None,
            analysis: None,
            metadata: None,
            created_at: Utc::now(),
        };
        assert!(Message::try_from(row).is_err());
    }
}
