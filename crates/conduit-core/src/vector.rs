//! Vector catalog (spec §4.7).
//!
//! Namespaces equal `appName`; embeds `"<toolName>: <description>"`;
//! cosine distance; 1536 dims; batched upserts of 100. Backed by `pgvector`
//! over the same Postgres database the relational store uses, grounded on
//! `memory/db.rs`'s `insert_passage_with_embedding`/`search_passages_by_embedding`
//! pair. Unlike that raw-`sql_query`-with-string-interpolated-floats
//! approach, this uses `pgvector`'s typed Diesel integration (`Vector` as a
//! first-class column type, already declared in `schema.rs`), avoiding
//! hand-built SQL strings entirely.

use anyhow::{Context, Result};
use diesel::prelude::*;
use pgvector::{Vector, VectorExpressionMethods};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::tool_embeddings;
use crate::store::Store;

pub const EMBEDDING_DIM: usize = conduit_tools::EMBEDDING_DIM;
pub const UPSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct ToolEmbeddingEntry {
    pub tool_name: String,
    pub description: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

#[derive(Insertable)]
#[diesel(table_name = tool_embeddings)]
struct NewToolEmbedding<'a> {
    id: Uuid,
    namespace: &'a str,
    tool_name: &'a str,
    description: &'a str,
    embedding: Option<Vector>,
    metadata: Value,
}

/// Ingestion and search over a per-app namespace of tool descriptions
/// (spec §4.7). The trait boundary exists so the dispatcher/router can be
/// tested against a fake catalog without a live Postgres instance.
#[async_trait::async_trait]
pub trait VectorCatalog: Send + Sync {
    async fn upsert(&self, namespace: &str, entries: Vec<ToolEmbeddingEntry>) -> Result<()>;
    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;
}

pub struct PgVectorCatalog {
    store: Store,
}

impl PgVectorCatalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl VectorCatalog for PgVectorCatalog {
    async fn upsert(&self, namespace: &str, entries: Vec<ToolEmbeddingEntry>) -> Result<()> {
        for chunk in entries.chunks(UPSERT_BATCH_SIZE) {
            self.upsert_batch(namespace, chunk)?;
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        self.query_sync(namespace, vector, top_k)
    }
}

impl PgVectorCatalog {
    fn upsert_batch(&self, namespace: &str, entries: &[ToolEmbeddingEntry]) -> Result<()> {
        let mut conn = self.store.raw_connection()?;

        for entry in entries {
            let new_row = NewToolEmbedding {
                id: Uuid::new_v4(),
                namespace,
                tool_name: &entry.tool_name,
                description: &entry.description,
                embedding: Some(Vector::from(entry.embedding.clone())),
                metadata: entry.metadata.clone(),
            };

            diesel::insert_into(tool_embeddings::table)
                .values(&new_row)
                .on_conflict((tool_embeddings::namespace, tool_embeddings::tool_name))
                .do_update()
                .set((
                    tool_embeddings::description.eq(&new_row.description),
                    tool_embeddings::embedding.eq(&new_row.embedding),
                    tool_embeddings::metadata.eq(&new_row.metadata),
                ))
                .execute(&mut *conn)
                .context("failed to upsert tool embedding")?;
        }

        Ok(())
    }

    fn query_sync(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let mut conn = self.store.raw_connection()?;
        let query_vector = Vector::from(vector.to_vec());

        let rows: Vec<(String, Value, f64)> = tool_embeddings::table
            .filter(tool_embeddings::namespace.eq(namespace))
            .filter(tool_embeddings::embedding.is_not_null())
            .select((
                tool_embeddings::tool_name,
                tool_embeddings::metadata,
                tool_embeddings::embedding
                    .assume_not_null()
                    .cosine_distance(query_vector.clone()),
            ))
            .order(
                tool_embeddings::embedding
                    .assume_not_null()
                    .cosine_distance(query_vector),
            )
            .limit(top_k as i64)
            .load(&mut *conn)
            .context("failed to query tool embeddings")?;

        Ok(rows
            .into_iter()
            .map(|(id, metadata, distance)| VectorMatch {
                id,
                score: 1.0 - distance as f32,
                metadata,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_dim_matches_spec() {
        assert_eq!(EMBEDDING_DIM, 1536);
    }

    #[test]
    fn upsert_batch_size_matches_spec() {
        assert_eq!(UPSERT_BATCH_SIZE, 100);
    }
}
