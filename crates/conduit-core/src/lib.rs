//! Conduit Core
//!
//! The orchestration pipeline, domain model, and persistence layer behind
//! the chat endpoint: five stages (context init, analysis, routing +
//! tool preparation, dispatch, persistence) over a Postgres/Diesel store,
//! a Redis cache, a pgvector tool catalog, and a remote tool broker.

pub mod cache;
pub mod config;
pub mod connection_registry;
pub mod error;
pub mod llm;
pub mod maintenance;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod session_lock;
pub mod store;
pub mod vector;

pub use config::Config;
pub use connection_registry::ConnectionRegistry;
pub use error::CoreError;
pub use pipeline::{ChatEngine, ChatRequest, ChatResponse};
pub use store::Store;
