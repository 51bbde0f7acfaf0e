//! Stage 3b: Tool Preparer (spec §4.3 `prepare`).
//!
//! Candidate apps are fanned out concurrently with `futures::future::join_all`
//! (spec §4.3: "all network steps in step 3 MUST run concurrently... failures
//! must not abort the others"), grounded on `main.rs`'s `tokio::spawn`
//! concurrency idiom, generalized to a bounded join-all since the app count
//! is fixed at the top-3 cap and never needs a semaphore.

use std::time::Duration;

use conduit_tools::{BrokerClient, EmbeddingClient, ToolDescriptor, ToolFilter};

use crate::cache::{ttl, Cache};
use crate::connection_registry::ConnectionRegistry;
use crate::model::ComprehensiveAnalysis;
use crate::vector::VectorCatalog;

const TOP_K_APPS: usize = 3;
const TOP_K_TOOLS: usize = 5;
const BROKER_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Preparation {
    pub tools: Vec<ToolDescriptor>,
    pub required_connections: Vec<String>,
    /// `appName -> brokerAccountId` for every app that resolved to a usable
    /// connection, so the dispatcher can execute tools without re-querying
    /// the registry.
    pub connected_accounts: std::collections::HashMap<String, String>,
}

/// `prepare(analysis, query, userId, initialToolNames)` (spec §4.3).
#[allow(clippy::too_many_arguments)]
pub async fn prepare(
    cache: &Cache,
    vector_catalog: &dyn VectorCatalog,
    broker: &BrokerClient,
    embeddings: &EmbeddingClient,
    connections: &ConnectionRegistry,
    analysis: &ComprehensiveAnalysis,
    query: &str,
    user_id: &str,
    router_app_names: &[String],
    initial_tool_names: &[String],
) -> Preparation {
    // Edge case: an app in recommendedApps but absent from the router's
    // output is excluded.
    let router_set: std::collections::HashSet<&str> =
        router_app_names.iter().map(String::as_str).collect();
    let candidate_apps: Vec<&str> = analysis
        .recommended_apps
        .iter()
        .map(String::as_str)
        .filter(|app| router_set.contains(app))
        .collect();

    let priority_for = |app: &str| -> u8 {
        analysis
            .tool_priorities
            .iter()
            .filter(|tp| tp.tool_name.starts_with(&format!("{}_", app)))
            .map(|tp| tp.priority)
            .max()
            .unwrap_or(5)
    };

    let mut ranked: Vec<&str> = candidate_apps;
    ranked.sort_by_key(|app| std::cmp::Reverse(priority_for(app)));
    ranked.truncate(TOP_K_APPS);

    let futures = ranked.into_iter().map(|app| {
        let app = app.to_string();
        prepare_one_app(
            cache,
            vector_catalog,
            broker,
            embeddings,
            connections,
            query,
            user_id,
            app,
            initial_tool_names,
        )
    });

    let results = futures::future::join_all(futures).await;

    let mut tools = Vec::new();
    let mut required_connections = Vec::new();
    let mut connected_accounts = std::collections::HashMap::new();

    for result in results {
        match result {
            AppPrepResult::Ready(app, account_id, mut app_tools) => {
                tools.append(&mut app_tools);
                connected_accounts.insert(app, account_id);
            }
            AppPrepResult::RequiresConnection(app) => required_connections.push(app),
            AppPrepResult::Skipped => {}
        }
    }

    Preparation {
        tools,
        required_connections,
        connected_accounts,
    }
}

enum AppPrepResult {
    Ready(String, String, Vec<ToolDescriptor>),
    RequiresConnection(String),
    Skipped,
}

#[allow(clippy::too_many_arguments)]
async fn prepare_one_app(
    cache: &Cache,
    vector_catalog: &dyn VectorCatalog,
    broker: &BrokerClient,
    embeddings: &EmbeddingClient,
    connections: &ConnectionRegistry,
    query: &str,
    user_id: &str,
    app: String,
    initial_tool_names: &[String],
) -> AppPrepResult {
    let connection = match connections.get(user_id, &app) {
        Ok(Some(c)) if c.status.is_usable() => c,
        Ok(_) => return AppPrepResult::RequiresConnection(app),
        Err(e) => {
            tracing::warn!("connection lookup failed for {}: {} - skipping", app, e);
            return AppPrepResult::Skipped;
        }
    };

    let prefix = format!("{}_", app);
    let prefixed: Vec<String> = initial_tool_names
        .iter()
        .filter(|t| t.starts_with(&prefix))
        .cloned()
        .collect();

    let tool_names = if !prefixed.is_empty() {
        prefixed
    } else {
        match vector_search_tools(cache, vector_catalog, embeddings, &app, query).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("vector search failed for {}: {} - skipping", app, e);
                return AppPrepResult::Skipped;
            }
        }
    };

    if tool_names.is_empty() {
        return AppPrepResult::Ready(app, connection.broker_account_id, Vec::new());
    }

    let fetch = broker.get_tools(ToolFilter::Actions(tool_names), user_id);

    match tokio::time::timeout(BROKER_TOOLS_TIMEOUT, fetch).await {
        Ok(Ok(descriptors)) => AppPrepResult::Ready(app, connection.broker_account_id, descriptors),
        Ok(Err(e)) => {
            tracing::warn!("broker tool fetch failed for {}: {} - skipping", app, e);
            AppPrepResult::Skipped
        }
        Err(_) => {
            tracing::warn!("broker tool fetch timed out for {} - skipping", app);
            AppPrepResult::Skipped
        }
    }
}

async fn vector_search_tools(
    cache: &Cache,
    vector_catalog: &dyn VectorCatalog,
    embeddings: &EmbeddingClient,
    app: &str,
    query: &str,
) -> anyhow::Result<Vec<String>> {
    let cache_key = Cache::hash_key("tool_search", &format!("{}:{}", app, query));
    if let Ok(Some(cached)) = cache.get::<Vec<String>>(&cache_key).await {
        return Ok(cached);
    }

    let vector = embeddings.embed(query).await?;
    let matches = vector_catalog.query(app, &vector, TOP_K_TOOLS).await?;
    let names: Vec<String> = matches.into_iter().map(|m| m.id).collect();

    if let Err(e) = cache.set(&cache_key, &names, ttl::TOOL_SEARCH).await {
        tracing::warn!("failed to cache tool search result: {}", e);
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolPriority;

    #[test]
    fn priority_for_app_defaults_to_five() {
        let analysis_priorities: Vec<ToolPriority> = vec![];
        let priority_for = |app: &str| -> u8 {
            analysis_priorities
                .iter()
                .filter(|tp: &&ToolPriority| tp.tool_name.starts_with(&format!("{}_", app)))
                .map(|tp| tp.priority)
                .max()
                .unwrap_or(5)
        };
        assert_eq!(priority_for("GMAIL"), 5);
    }

    #[test]
    fn priority_for_app_uses_max_matching_tool_priority() {
        let priorities = vec![
            ToolPriority::new("GMAIL_SEND", 3),
            ToolPriority::new("GMAIL_SEARCH", 9),
        ];
        let priority_for = |app: &str| -> u8 {
            priorities
                .iter()
                .filter(|tp: &&ToolPriority| tp.tool_name.starts_with(&format!("{}_", app)))
                .map(|tp| tp.priority)
                .max()
                .unwrap_or(5)
        };
        assert_eq!(priority_for("GMAIL"), 9);
    }
}
