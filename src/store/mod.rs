/// Document store abstraction layer
///
/// Provides the DocumentStore trait and the types that cross it: documents written by
/// vault ingestion, rows pending embedding, and embedding batches written by the backfill.
/// Search and backfill only ever see this trait, so the store handle is injected by the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingStatus;
use crate::errors::VaultError;
use crate::search::query::KeywordQuery;
use crate::search::ScoredCandidate;

pub mod postgres;

/// Kind of vault file a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Page,
    Journal,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Page => "page",
            DocType::Journal => "journal",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(DocType::Page),
            "journal" => Ok(DocType::Journal),
            other => Err(format!("Unknown document type: {}", other)),
        }
    }
}

/// A stored document with its embedding bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Vault-relative path, e.g. "pages/Rust.md"
    pub id: String,
    pub doc_type: DocType,
    /// File stem
    pub title: String,
    pub content: String,
    /// File modification time reported by the vault
    pub modified_at: DateTime<Utc>,
    /// Last time the row was written
    pub updated_at: DateTime<Utc>,
    /// Bumped on every title/content change; an embedding is only written
    /// against the revision it was computed from.
    pub revision: i64,
    pub embedding_status: EmbeddingStatus,
    pub embedding_model: Option<String>,
    /// Whether the row currently holds a vector
    pub has_embedding: bool,
}

/// Input type for creating or replacing a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: String,
    pub doc_type: DocType,
    pub title: String,
    pub content: String,
    pub modified_at: DateTime<Utc>,
}

/// A document that has no embedding for its current revision.
#[derive(Debug, Clone)]
pub struct PendingEmbedding {
    pub id: String,
    pub title: String,
    pub content: String,
    pub revision: i64,
}

/// A computed vector for one document revision.
#[derive(Debug, Clone)]
pub struct EmbeddingWrite {
    pub id: String,
    pub revision: i64,
    pub vector: Vec<f32>,
}

/// A document whose embedding attempt failed in this batch.
#[derive(Debug, Clone)]
pub struct EmbeddingFailure {
    pub id: String,
    pub revision: i64,
    pub reason: String,
}

/// Everything one backfill batch writes back, committed as a single transaction.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub model: String,
    pub writes: Vec<EmbeddingWrite>,
    pub failures: Vec<EmbeddingFailure>,
}

/// Result of committing an EmbeddingBatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Documents whose vector was persisted
    pub written: Vec<String>,
    /// Documents whose revision changed (or gained a vector) since selection; nothing written
    pub stale: Vec<String>,
}

/// Embedding counts by status and by model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingStats {
    pub by_status: BTreeMap<String, i64>,
    pub by_model: BTreeMap<String, i64>,
}

impl EmbeddingStats {
    /// Documents still waiting for a vector (pending or failed).
    pub fn outstanding(&self) -> i64 {
        ["pending", "failed"]
            .iter()
            .filter_map(|s| self.by_status.get(*s))
            .sum()
    }
}

/// Core abstraction for document persistence and retrieval.
///
/// All implementations must be Send + Sync so a single handle can be shared by
/// search calls and a concurrently running backfill.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document by id.
    ///
    /// A change of title or content must drop any existing embedding, reset the
    /// embedding status to pending and bump the revision.
    async fn upsert(&self, input: NewDocument) -> Result<Document, VaultError>;

    /// Retrieve a document by id.
    async fn get(&self, id: &str) -> Result<Document, VaultError>;

    /// Count documents by type.
    async fn count_by_type(&self) -> Result<BTreeMap<DocType, i64>, VaultError>;

    /// Full-text query ranked by the store's native ranking function.
    ///
    /// Results are ordered by score descending, then id ascending.
    async fn keyword_search(
        &self,
        query: &KeywordQuery,
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError>;

    /// Cosine nearest-neighbour query over documents that have an embedding.
    ///
    /// Score is `1 - cosine_distance`; documents without a vector are never returned.
    async fn nearest_neighbors(
        &self,
        embedding: &[f32],
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError>;

    /// Documents without an embedding, ordered by id, starting strictly after `after`.
    async fn pending_embeddings(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<PendingEmbedding>, VaultError>;

    /// Atomically persist a batch of vectors and failure markers.
    ///
    /// A write only applies when the row is still at the given revision and has
    /// no vector; otherwise the id is reported as stale.
    async fn commit_embeddings(&self, batch: &EmbeddingBatch) -> Result<CommitOutcome, VaultError>;

    /// Return embedding statistics grouped by status and by model.
    async fn embedding_stats(&self) -> Result<EmbeddingStats, VaultError>;

    /// Delete vault documents (ids under `pages/` or `journals/`) whose id is not in `keep`.
    ///
    /// Returns the number of documents deleted.
    async fn remove_missing(&self, keep: &[String]) -> Result<u64, VaultError>;

    /// Drop every embedding so the next backfill recomputes them (model switch).
    ///
    /// Returns the number of embeddings dropped.
    async fn invalidate_embeddings(&self) -> Result<u64, VaultError>;
}
