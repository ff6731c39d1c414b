/// Library facade: the public search and backfill operations over injected handles.
///
/// VaultSearch owns no connections of its own. The caller builds the store and the
/// embedding provider, wraps them in Arc, and decides their lifetime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SearchConfig};
use crate::embedding::pipeline::{BackfillOptions, BackfillPipeline, BackfillReport};
use crate::embedding::{embed_checked, EmbeddingProvider};
use crate::errors::VaultError;
use crate::search::query::{self, KeywordQuery};
use crate::search::{fuse, FusedResult, FusionWeights, ScoredCandidate};
use crate::store::{DocType, Document, DocumentStore, EmbeddingStats};

pub struct VaultSearch {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn EmbeddingProvider>,
    search: SearchConfig,
    embed_timeout: Duration,
    pipeline: BackfillPipeline,
}

fn check_limit(limit: usize) -> Result<i64, VaultError> {
    if limit == 0 {
        return Err(VaultError::validation("limit", "limit must be at least 1"));
    }
    i64::try_from(limit).map_err(|_| VaultError::validation("limit", "limit is too large"))
}

impl VaultSearch {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self::with_options(
            store,
            provider,
            config.search.clone(),
            BackfillOptions::from_config(config),
        )
    }

    pub fn with_options(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn EmbeddingProvider>,
        search: SearchConfig,
        backfill: BackfillOptions,
    ) -> Self {
        let embed_timeout = backfill.embed_timeout;
        let pipeline = BackfillPipeline::new(Arc::clone(&store), Arc::clone(&provider), backfill);
        VaultSearch {
            store,
            provider,
            search,
            embed_timeout,
            pipeline,
        }
    }

    /// Full-text search where every query word must match.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        let limit = check_limit(limit)?;
        self.keyword(&KeywordQuery::Plain(query.to_string()), limit, doc_type).await
    }

    /// Full-text search with phrase, required, excluded and optional clauses.
    ///
    /// See `search::query` for the grammar.
    pub async fn advanced_search(
        &self,
        query: &str,
        limit: usize,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        let limit = check_limit(limit)?;
        let parsed = query::parse(query);
        tracing::debug!(
            required = parsed.required.len(),
            optional = parsed.optional.len(),
            excluded = parsed.excluded.len(),
            "Parsed advanced query"
        );
        self.keyword(&KeywordQuery::Advanced(parsed), limit, doc_type).await
    }

    async fn keyword(
        &self,
        query: &KeywordQuery,
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self.store.keyword_search(query, limit, doc_type).await?;
        tracing::debug!(hits = hits.len(), "Keyword search complete");
        Ok(hits)
    }

    /// Cosine-similarity search over documents that have an embedding.
    ///
    /// Provider failures propagate; documents without a vector are never returned.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        let limit = check_limit(limit)?;
        self.semantic(query, limit, doc_type).await
    }

    async fn semantic(
        &self,
        query: &str,
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = embed_checked(self.provider.as_ref(), query, self.embed_timeout).await?;
        let hits = self.store.nearest_neighbors(&vector, limit, doc_type).await?;
        tracing::debug!(hits = hits.len(), "Semantic search complete");
        Ok(hits)
    }

    /// Weighted blend of keyword and semantic search.
    ///
    /// Weights are validated before any I/O. A leg with weight 0 is not run at all,
    /// so `semantic_weight = 0` never touches the embedding provider.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        fts_weight: f64,
        semantic_weight: f64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<FusedResult>, VaultError> {
        let weights = FusionWeights::new(fts_weight, semantic_weight)?;
        check_limit(limit)?;
        let pool = check_limit(limit.max(self.search.candidate_pool))?;

        let keyword_hits = if weights.fts > 0.0 {
            self.keyword(&KeywordQuery::Plain(query.to_string()), pool, doc_type).await?
        } else {
            Vec::new()
        };
        let semantic_hits = if weights.semantic > 0.0 {
            self.semantic(query, pool, doc_type).await?
        } else {
            Vec::new()
        };

        let fused = fuse(&keyword_hits, &semantic_hits, weights.fts, weights.semantic, limit)?;
        tracing::debug!(
            keyword = keyword_hits.len(),
            semantic = semantic_hits.len(),
            fused = fused.len(),
            "Hybrid search complete"
        );
        Ok(fused)
    }

    /// Embed every document lacking a vector. See `BackfillPipeline`.
    pub async fn backfill(&self, batch_size: usize) -> Result<BackfillReport, VaultError> {
        self.pipeline.backfill(batch_size).await
    }

    pub fn backfill_pipeline(&self) -> &BackfillPipeline {
        &self.pipeline
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, VaultError> {
        self.store.get(id).await
    }

    pub async fn document_counts(&self) -> Result<BTreeMap<DocType, i64>, VaultError> {
        self.store.count_by_type().await
    }

    pub async fn embedding_stats(&self) -> Result<EmbeddingStats, VaultError> {
        self.store.embedding_stats().await
    }

    /// Drop every stored vector after an embedding model change.
    ///
    /// Returns how many documents lost their embedding; the next backfill recomputes them.
    pub async fn invalidate_embeddings(&self) -> Result<u64, VaultError> {
        let dropped = self.store.invalidate_embeddings().await?;
        tracing::info!(dropped, model = self.provider.model_name(), "Embeddings invalidated");
        Ok(dropped)
    }
}
