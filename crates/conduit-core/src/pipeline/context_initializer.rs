//! Stage 1: Context Initializer (spec §4.1).
//!
//! Grounded on `agent_manager.rs`'s `get_or_create_context`: find-or-create
//! by natural key, refresh activity, create the child entity lazily.
//! Generalized from a single `chat_contexts` table to the
//! `users -> sessions -> conversations` chain.

use anyhow::Result;
use uuid::Uuid;

use crate::cache::{ttl, Cache};
use crate::model::{ConversationSummary, Message};
use crate::store::Store;

pub struct ContextInit {
    pub user_id: String,
    pub session_id: Uuid,
    pub conversation_id: Uuid,
    pub prior_summary: Option<ConversationSummary>,
}

/// `initContext(userId, sessionId?, email?, name?)` (spec §4.1). Email/name
/// enrichment isn't part of the chat request contract (spec §6), so this
/// always finds-or-creates the bare user id.
pub async fn init_context(
    store: &Store,
    cache: &Cache,
    user_id: &str,
    session_id: Option<Uuid>,
) -> Result<ContextInit> {
    let store = store.clone();
    let cache = cache.clone();
    let user_id_owned = user_id.to_string();

    let (session, conversation_id) = {
        let store = store.clone();
        let user_id_owned = user_id_owned.clone();
        tokio::task::spawn_blocking(move || -> Result<_> {
            let _user = store.get_or_create_user(&user_id_owned, None, None)?;
            let session = store.get_or_create_session(&user_id_owned, session_id)?;
            let conversation = store.get_or_create_current_conversation(session.id)?;
            Ok((session, conversation.id))
        })
        .await??
    };

    let cache_key = Cache::hash_key("session", &session.id.to_string());
    if let Err(e) = cache.set(&cache_key, &session.id.to_string(), ttl::SESSION).await {
        tracing::warn!("failed to warm session cache: {}", e);
    }

    Ok(ContextInit {
        user_id: user_id_owned,
        session_id: session.id,
        conversation_id,
        prior_summary: session.conversation_summary,
    })
}

/// `loadHistory(sessionId, limit)` (spec §4.1): last `limit` messages for
/// the session's current conversation, oldest-first, read-through cached
/// 5 minutes keyed by `(sessionId, limit)`.
pub async fn load_history(
    store: &Store,
    cache: &Cache,
    conversation_id: Uuid,
    limit: i64,
) -> Result<Vec<Message>> {
    let key = Cache::hash_key(
        "messages",
        &format!("{}:{}", conversation_id, limit),
    );

    if let Ok(Some(cached)) = cache.get::<Vec<StoredMessage>>(&key).await {
        return Ok(cached.into_iter().map(StoredMessage::into_message).collect());
    }

    let store = store.clone();
    let messages = tokio::task::spawn_blocking(move || store.recent_messages(conversation_id, limit))
        .await??;

    let to_cache: Vec<StoredMessage> = messages.iter().cloned().map(StoredMessage::from_message).collect();
    if let Err(e) = cache.set(&key, &to_cache, ttl::MESSAGE_HISTORY).await {
        tracing::warn!("failed to cache message history: {}", e);
    }

    Ok(messages)
}

/// A cache-serializable projection of `Message`. `ComprehensiveAnalysis`
/// and tool calls round-trip through JSON already; this just keeps the
/// cache payload decoupled from the domain type's field order.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct StoredMessage {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    tool_calls: Option<serde_json::Value>,
    analysis: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl StoredMessage {
    fn from_message(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            role: m.role.as_str().to_string(),
            content: m.content,
            tool_calls: m.tool_calls.map(|t| serde_json::to_value(t).unwrap_or_default()),
            analysis: m.analysis.map(|a| serde_json::to_value(a).unwrap_or_default()),
            metadata: m.metadata,
            created_at: m.created_at,
        }
    }

    fn into_message(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            role: self.role.parse().unwrap_or(crate::model::MessageRole::User),
            content: self.content,
            tool_calls: self.tool_calls.and_then(|v| serde_json::from_value(v).ok()),
            analysis: self.analysis.and_then(|v| serde_json::from_value(v).ok()),
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}
