//! The five-stage chat orchestration pipeline (spec §2).
//!
//! `ChatEngine` owns every collaborator the stages need and exposes the
//! single `dispatch` entry point the HTTP binary calls. Control flow is
//! strictly left-to-right: `context_initializer` -> `analyzer` ->
//! `router`/`tool_preparer` -> `dispatcher` -> `persistence`. Stages 2-4 may
//! short-circuit into an early `ChatResponse`, but stage 5 always runs.

mod analyzer;
mod context_initializer;
mod dispatcher;
mod persistence;
mod router;
mod tool_preparer;

use std::sync::Arc;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::Config;
use crate::connection_registry::ConnectionRegistry;
use crate::error::CoreError;
use crate::model::{ComprehensiveAnalysis, ExecutedTool, Message};
use crate::session_lock::SessionLocks;
use crate::store::Store;
use crate::vector::VectorCatalog;
use conduit_tools::{BrokerClient, EmbeddingClient, TopToolsCatalog};

/// `{ userQuery, userId, sessionId?, conversationHistory? }` (spec §6).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_query: String,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub conversation_history: Option<Vec<Message>>,
}

/// `{ response, executedTools?, requiredConnections?, conversationHistory?, analysis?, error? }`
/// (spec §6).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: Option<Uuid>,
    pub executed_tools: Vec<ExecutedTool>,
    pub required_connections: Vec<String>,
    pub conversation_history: Vec<Message>,
    pub analysis: Option<ComprehensiveAnalysis>,
    pub error: Option<String>,
}

/// Every collaborator named in spec §6: store, cache, vector catalog,
/// broker, top-tools catalog, embedding client, plus the per-session lock
/// table. Cheaply `Clone`-able (each field is already `Arc`/cheap-to-clone),
/// matching the teacher's `AgentManager` holding its dependencies by value.
#[derive(Clone)]
pub struct ChatEngine {
    store: Store,
    cache: Cache,
    vector_catalog: Arc<dyn VectorCatalog>,
    broker: BrokerClient,
    top_tools: Arc<dyn TopToolsCatalog>,
    embeddings: EmbeddingClient,
    connections: Arc<ConnectionRegistry>,
    locks: Arc<SessionLocks>,
    config: Arc<Config>,
}

impl ChatEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        cache: Cache,
        vector_catalog: Arc<dyn VectorCatalog>,
        broker: BrokerClient,
        top_tools: Arc<dyn TopToolsCatalog>,
        embeddings: EmbeddingClient,
        connections: Arc<ConnectionRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            cache,
            vector_catalog,
            broker,
            top_tools,
            embeddings,
            connections,
            locks: Arc::new(SessionLocks::new()),
            config,
        }
    }

    /// Runs one full turn through all five stages (spec §2, §4).
    pub async fn dispatch(&self, request: ChatRequest) -> ChatResponse {
        if request.user_query.trim().is_empty() || request.user_id.trim().is_empty() {
            return ChatResponse {
                error: Some("userQuery and userId are required".to_string()),
                ..Default::default()
            };
        }

        let init = match context_initializer::init_context(
            &self.store,
            &self.cache,
            &request.user_id,
            request.session_id,
        )
        .await
        {
            Ok(init) => init,
            Err(e) => {
                tracing::error!("context initialization failed: {}", e);
                return ChatResponse {
                    error: Some(CoreError::Fatal(e).user_message()),
                    ..Default::default()
                };
            }
        };

        // Serialize turns for the same session (spec §5); released on drop.
        let _guard = self.locks.acquire(init.session_id).await;

        let history = context_initializer::load_history(
            &self.store,
            &self.cache,
            init.conversation_id,
            self.config.max_conversation_history as i64,
        )
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("history load failed, proceeding with empty history: {}", e);
            Vec::new()
        });

        let prior_summary = init.prior_summary.clone();

        let analysis = analyzer::analyze(
            &self.cache,
            &self.config,
            &request.user_query,
            &history,
            prior_summary.as_ref(),
        )
        .await;

        let dispatch_result = dispatcher::dispatch(
            &self.store,
            &self.cache,
            &self.vector_catalog,
            &self.broker,
            &self.top_tools,
            &self.embeddings,
            &self.connections,
            &self.config,
            &request,
            &analysis,
            &history,
        )
        .await;

        if let Err(e) = persistence::commit(
            &self.store,
            &self.cache,
            &self.config,
            init.conversation_id,
            init.session_id,
            &request.user_query,
            &dispatch_result,
            &analysis,
        )
        .await
        {
            tracing::warn!("persistence failed for session {}: {}", init.session_id, e);
        }

        drop(_guard);
        self.locks.forget(init.session_id).await;

        ChatResponse {
            response: dispatch_result.text,
            session_id: Some(init.session_id),
            executed_tools: dispatch_result.executed_tools,
            required_connections: dispatch_result.required_connections,
            conversation_history: history,
            analysis: Some(analysis),
            error: None,
        }
    }
}
