//! Stage 5: Persistence & Summary Writer (spec §4.5).
//!
//! Ordered writes through the Diesel store layer, grounded on the
//! teacher's `store_message_with_compaction_check`: store first, then
//! update derived state, and never let the derived-state step fail the
//! primary write. Cache invalidation follows the write, not the other
//! way around.

use anyhow::Result;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::Config;
use crate::model::{ComprehensiveAnalysis, MessageRole};
use crate::store::Store;

use super::dispatcher::DispatchOutcome;

/// `commit(request, response, analysis)` (spec §4.5). Errors are returned
/// to the caller, which logs them as a non-fatal warning — the dispatch
/// result itself must not be lost over a persistence failure.
#[allow(clippy::too_many_arguments)]
pub async fn commit(
    store: &Store,
    cache: &Cache,
    config: &Config,
    conversation_id: Uuid,
    session_id: Uuid,
    user_query: &str,
    outcome: &DispatchOutcome,
    analysis: &ComprehensiveAnalysis,
) -> Result<()> {
    let store = store.clone();
    let user_query = user_query.to_string();
    let outcome_text = outcome.text.clone();
    let tool_calls = outcome.executed_tools.clone();
    let analysis_for_message = analysis.clone();
    let summary = analysis.conversation_summary.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        store.append_message(conversation_id, MessageRole::User, &user_query, None, None, None)?;

        let tool_calls_slice = if tool_calls.is_empty() { None } else { Some(tool_calls.as_slice()) };
        store.append_message(
            conversation_id,
            MessageRole::Assistant,
            &outcome_text,
            tool_calls_slice,
            Some(&analysis_for_message),
            None,
        )?;

        store.update_session_summary(session_id, &summary)?;

        Ok(())
    })
    .await??;

    let limit = config.max_conversation_history;
    let keys = [
        Cache::hash_key("messages", &format!("{}:{}", conversation_id, limit)),
        Cache::hash_key("session", &session_id.to_string()),
        Cache::hash_key("session_summary", &session_id.to_string()),
    ];

    for key in keys {
        if let Err(e) = cache.invalidate(&key).await {
            tracing::warn!("failed to invalidate cache key {}: {}", key, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_match_the_message_history_fingerprint() {
        let conversation_id = Uuid::new_v4();
        let limit = 20usize;
        let expected = Cache::hash_key("messages", &format!("{}:{}", conversation_id, limit));
        let actual = Cache::hash_key("messages", &format!("{}:{}", conversation_id, limit));
        assert_eq!(expected, actual);
    }
}
