//! Conduit HTTP binary: chat, connection, and admin catalog endpoints plus
//! a health check, grounded on the teacher's `main.rs` axum health-router
//! setup (logging init, `.env` load, migrations, then serve), extended
//! with the routes spec §6 names.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use conduit_core::cache::Cache;
use conduit_core::config::Config;
use conduit_core::connection_registry::ConnectionRegistry;
use conduit_core::maintenance;
use conduit_core::model::{ComprehensiveAnalysis, ExecutedTool, Message};
use conduit_core::vector::{PgVectorCatalog, ToolEmbeddingEntry, VectorCatalog};
use conduit_core::{ChatEngine, ChatRequest, Store};
use conduit_tools::{BrokerClient, EmbeddingClient, StaticTopToolsCatalog, TopToolsCatalog};

#[derive(Clone)]
struct AppState {
    engine: ChatEngine,
    connections: Arc<ConnectionRegistry>,
    vector_catalog: Arc<dyn VectorCatalog>,
    embeddings: EmbeddingClient,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Spec §6 chat endpoint request/response shape.
#[derive(Deserialize)]
struct ChatHttpRequest {
    user_query: String,
    user_id: String,
    session_id: Option<Uuid>,
    conversation_history: Option<Vec<Message>>,
}

#[derive(Serialize)]
struct ChatHttpResponse {
    response: String,
    session_id: Option<Uuid>,
    executed_tools: Vec<ExecutedTool>,
    required_connections: Vec<String>,
    conversation_history: Vec<Message>,
    analysis: Option<ComprehensiveAnalysis>,
    error: Option<String>,
}

/// `400` on missing required fields; `500` on unrecoverable core failure;
/// every other condition is a `200` with a textual explanation (spec §6).
async fn chat_handler(
    State(state): State<AppState>,
    Json(body): Json<ChatHttpRequest>,
) -> Result<Json<ChatHttpResponse>, StatusCode> {
    if body.user_query.trim().is_empty() || body.user_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let request = ChatRequest {
        user_query: body.user_query,
        user_id: body.user_id,
        session_id: body.session_id,
        conversation_history: body.conversation_history,
    };

    let response = state.engine.dispatch(request).await;

    Ok(Json(ChatHttpResponse {
        response: response.response,
        session_id: response.session_id,
        executed_tools: response.executed_tools,
        required_connections: response.required_connections,
        conversation_history: response.conversation_history,
        analysis: response.analysis,
        error: response.error,
    }))
}

#[derive(Deserialize)]
struct InitiateConnectionRequest {
    user_id: String,
    app_name: String,
}

#[derive(Serialize)]
struct ConnectionResponse {
    id: Uuid,
    app_name: String,
    broker_account_id: String,
    status: String,
}

async fn initiate_connection(
    State(state): State<AppState>,
    Json(body): Json<InitiateConnectionRequest>,
) -> Result<Json<ConnectionResponse>, StatusCode> {
    match state.connections.initiate(&body.user_id, &body.app_name).await {
        Ok(connection) => Ok(Json(ConnectionResponse {
            id: connection.id,
            app_name: connection.app_name,
            broker_account_id: connection.broker_account_id,
            status: connection.status.as_str().to_string(),
        })),
        Err(e) => {
            warn!("failed to initiate connection: {}", e);
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

#[derive(Deserialize)]
struct ReinitiateConnectionRequest {
    user_id: String,
    app_name: String,
    redirect_uri: String,
}

async fn reinitiate_connection(
    State(state): State<AppState>,
    Json(body): Json<ReinitiateConnectionRequest>,
) -> Result<Json<ConnectionResponse>, StatusCode> {
    match state
        .connections
        .reinitiate(&body.user_id, &body.app_name, &body.redirect_uri)
        .await
    {
        Ok(connection) => Ok(Json(ConnectionResponse {
            id: connection.id,
            app_name: connection.app_name,
            broker_account_id: connection.broker_account_id,
            status: connection.status.as_str().to_string(),
        })),
        Err(e) => {
            warn!("failed to reinitiate connection: {}", e);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

#[derive(Deserialize)]
struct ConnectionCallbackRequest {
    connected_account_id: String,
    user_id: String,
    app_name: String,
    status: String,
}

/// Broker OAuth callback (spec §4.8: `INITIATED -> ACTIVE` on status
/// `ACTIVE`, reported by the broker once the handshake completes).
async fn connection_callback(
    State(state): State<AppState>,
    Json(body): Json<ConnectionCallbackRequest>,
) -> Result<Json<ConnectionResponse>, StatusCode> {
    match state.connections.callback(
        &body.connected_account_id,
        &body.user_id,
        &body.app_name,
        &body.status,
    ) {
        Ok(connection) => Ok(Json(ConnectionResponse {
            id: connection.id,
            app_name: connection.app_name,
            broker_account_id: connection.broker_account_id,
            status: connection.status.as_str().to_string(),
        })),
        Err(e) => {
            warn!("failed to process connection callback: {}", e);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

async fn get_connection(
    State(state): State<AppState>,
    Path((user_id, app_name)): Path<(String, String)>,
) -> Result<Json<Option<ConnectionResponse>>, StatusCode> {
    match state.connections.get(&user_id, &app_name) {
        Ok(connection) => Ok(Json(connection.map(|c| ConnectionResponse {
            id: c.id,
            app_name: c.app_name,
            broker_account_id: c.broker_account_id,
            status: c.status.as_str().to_string(),
        }))),
        Err(e) => {
            error!("failed to look up connection: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Admin: ingest a batch of tool descriptors into the vector catalog for a
/// single app namespace (spec §4.7 `upsert`, embedding the
/// `"<toolName>: <description>"` string per tool).
#[derive(Deserialize)]
struct IngestCatalogRequest {
    app_name: String,
    tools: Vec<IngestTool>,
}

#[derive(Deserialize)]
struct IngestTool {
    name: String,
    description: String,
}

async fn ingest_catalog(
    State(state): State<AppState>,
    Json(body): Json<IngestCatalogRequest>,
) -> Result<StatusCode, StatusCode> {
    let mut entries = Vec::with_capacity(body.tools.len());
    for tool in body.tools {
        let text = format!("{}: {}", tool.name, tool.description);
        let embedding = state.embeddings.embed(&text).await.map_err(|e| {
            error!("embedding failed for {}: {}", tool.name, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        entries.push(ToolEmbeddingEntry {
            tool_name: tool.name,
            description: tool.description,
            embedding,
            metadata: serde_json::Value::Null,
        });
    }

    match state.vector_catalog.upsert(&body.app_name, entries).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!("catalog ingest failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
struct SearchCatalogQuery {
    app_name: String,
    query: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct SearchCatalogResult {
    tool_name: String,
    score: f32,
}

async fn search_catalog(
    State(state): State<AppState>,
    Json(body): Json<SearchCatalogQuery>,
) -> Result<Json<Vec<SearchCatalogResult>>, StatusCode> {
    let vector = state.embeddings.embed(&body.query).await.map_err(|e| {
        error!("embedding failed for search query: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    match state
        .vector_catalog
        .query(&body.app_name, &vector, body.top_k.unwrap_or(5))
        .await
    {
        Ok(matches) => Ok(Json(
            matches
                .into_iter()
                .map(|m| SearchCatalogResult {
                    tool_name: m.id,
                    score: m.score,
                })
                .collect(),
        )),
        Err(e) => {
            error!("catalog search failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "conduit_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);
    info!("configuration loaded");

    let store = Store::connect(&config.database_url)?;
    store.run_migrations()?;
    info!("database migrations applied");

    let cache = Cache::connect(&config.redis_url()).await?;

    let broker = BrokerClient::new(&config.broker_api_base, &config.broker_api_key)?;
    let embeddings = EmbeddingClient::new(
        &config.embedding_api_url,
        &config.embedding_api_key,
        &config.embedding_model,
    );

    let top_tools: Arc<dyn TopToolsCatalog> = match &config.top_tools_catalog_path {
        Some(path) => Arc::new(StaticTopToolsCatalog::load(path)),
        None => Arc::new(StaticTopToolsCatalog::default()),
    };

    let vector_catalog: Arc<dyn VectorCatalog> = Arc::new(PgVectorCatalog::new(store.clone()));
    let connections = Arc::new(ConnectionRegistry::new(store.clone(), broker.clone()));

    maintenance::spawn(store.clone(), connections.clone());
    info!("background connection/session maintenance started");

    let engine = ChatEngine::new(
        store,
        cache,
        vector_catalog.clone(),
        broker,
        top_tools,
        embeddings.clone(),
        connections.clone(),
        config.clone(),
    );

    let state = AppState {
        engine,
        connections,
        vector_catalog,
        embeddings,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat_handler))
        .route("/connections/initiate", post(initiate_connection))
        .route("/connections/reinitiate", post(reinitiate_connection))
        .route("/connections/callback", post(connection_callback))
        .route("/connections/{user_id}/{app_name}", get(get_connection))
        .route("/admin/catalog/ingest", post(ingest_catalog))
        .route("/admin/catalog/search", post(search_catalog))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("listening on port {}", config.http_port);
    axum::serve(listener, app).await?;

    Ok(())
}
