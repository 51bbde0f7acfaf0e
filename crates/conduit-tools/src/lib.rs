//! Conduit Tools - thin clients for the external systems the core depends on
//!
//! - `broker`: tool-execution broker client (initiate/get/reinitiate/getTools/execute)
//! - `embedding`: embedding generation client shared by the vector catalog
//! - `topcatalog`: static per-app top-tools catalog loader

pub mod broker;
pub mod embedding;
pub mod topcatalog;

pub use broker::{BrokerClient, BrokerError, ConnectedAccount, ExecuteResult, ToolDescriptor};
pub use embedding::{EmbeddingClient, EMBEDDING_DIM};
pub use topcatalog::{StaticTopToolsCatalog, TopToolsCatalog};
