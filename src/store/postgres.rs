/// PostgreSQL-backed implementation of DocumentStore
///
/// Uses sqlx with PgPool for connection pooling, a generated tsvector column for
/// full-text search and a pgvector column for cosine nearest-neighbour queries.
/// Supports optional migration execution on startup.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Row,
};

use crate::embedding::EmbeddingStatus;
use crate::errors::VaultError;
use crate::search::query::{KeywordQuery, TS_CONFIG};
use crate::search::{ScoreMethod, ScoredCandidate};
use crate::store::{
    CommitOutcome, DocType, Document, DocumentStore, EmbeddingBatch, EmbeddingStats, NewDocument,
    PendingEmbedding,
};

const DOCUMENT_COLUMNS: &str = "id, doc_type, title, content, modified_at, updated_at, revision, \
     embedding_status, embedding_model, (embedding IS NOT NULL) AS has_embedding";

/// PostgreSQL-backed document store using sqlx connection pool.
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Create a new PostgresDocumentStore, connecting to the PostgreSQL database at database_url.
    ///
    /// If run_migrations is true, automatically runs pending migrations on startup.
    pub async fn new(database_url: &str, run_migrations: bool) -> Result<Self, VaultError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)          // single user: searches plus one backfill
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))   // unreachable database fails fast
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| VaultError::StoreUnavailable(format!("Failed to connect to database: {}", e)))?;

        if run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| VaultError::Storage(format!("Migration failed: {}", e)))?;
        }

        Ok(PostgresDocumentStore { pool })
    }

    /// Wrap an existing pool (migrations are the caller's concern).
    pub fn from_pool(pool: PgPool) -> Self {
        PostgresDocumentStore { pool }
    }

    /// Return the underlying PgPool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_doc_type(raw: &str) -> Result<DocType, VaultError> {
    raw.parse::<DocType>().map_err(VaultError::Storage)
}

/// Map a sqlx PgRow to a Document struct.
fn row_to_document(row: &PgRow) -> Result<Document, VaultError> {
    let doc_type: String = row.try_get("doc_type")?;
    let status: String = row.try_get("embedding_status")?;
    Ok(Document {
        id: row.try_get("id")?,
        doc_type: parse_doc_type(&doc_type)?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        modified_at: row.try_get("modified_at")?,
        updated_at: row.try_get("updated_at")?,
        revision: row.try_get("revision")?,
        embedding_status: status.parse::<EmbeddingStatus>().map_err(VaultError::Storage)?,
        embedding_model: row.try_get("embedding_model")?,
        has_embedding: row.try_get("has_embedding")?,
    })
}

fn row_to_candidate(row: &PgRow, method: ScoreMethod) -> Result<ScoredCandidate, VaultError> {
    let doc_type: String = row.try_get("doc_type")?;
    let snippet = match method {
        ScoreMethod::Keyword => row.try_get("headline")?,
        ScoreMethod::Semantic => None,
    };
    Ok(ScoredCandidate {
        id: row.try_get("id")?,
        score: row.try_get("score")?,
        method,
        title: row.try_get("title")?,
        doc_type: parse_doc_type(&doc_type)?,
        snippet,
    })
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn upsert(&self, input: NewDocument) -> Result<Document, VaultError> {
        // PostgreSQL rejects NUL bytes in text columns
        let content = input.content.replace('\0', "");
        let title = input.title.replace('\0', "");

        // The BEFORE UPDATE trigger drops the embedding when title/content change
        let sql = format!(
            "INSERT INTO documents (id, doc_type, title, content, modified_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
                doc_type = EXCLUDED.doc_type, \
                title = EXCLUDED.title, \
                content = EXCLUDED.content, \
                modified_at = EXCLUDED.modified_at, \
                updated_at = NOW() \
             RETURNING {}",
            DOCUMENT_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(&input.id)
            .bind(input.doc_type.as_str())
            .bind(&title)
            .bind(&content)
            .bind(input.modified_at)
            .fetch_one(&self.pool)
            .await?;

        row_to_document(&row)
    }

    async fn get(&self, id: &str) -> Result<Document, VaultError> {
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VaultError::NotFound { id: id.to_string() })?;

        row_to_document(&row)
    }

    async fn count_by_type(&self) -> Result<BTreeMap<DocType, i64>, VaultError> {
        let rows = sqlx::query("SELECT doc_type, COUNT(*) AS count FROM documents GROUP BY doc_type")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            let doc_type: String = row.try_get("doc_type")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(parse_doc_type(&doc_type)?, count);
        }
        Ok(counts)
    }

    async fn keyword_search(
        &self,
        query: &KeywordQuery,
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        let Some(compiled) = query.compile(1) else {
            return Ok(Vec::new());
        };
        let type_param = compiled.params.len() + 1;
        let limit_param = type_param + 1;

        let sql = format!(
            "WITH query AS (SELECT {expr} AS q) \
             SELECT id, doc_type, title, \
                ts_rank(content_tsv, query.q)::float8 AS score, \
                ts_headline('{cfg}', content, query.q, \
                    'StartSel=>>>, StopSel=<<<, MaxWords=50, MinWords=20') AS headline \
             FROM documents, query \
             WHERE content_tsv @@ query.q \
               AND (${t}::text IS NULL OR doc_type = ${t}) \
             ORDER BY score DESC, id ASC \
             LIMIT ${l}",
            expr = compiled.expr,
            cfg = TS_CONFIG,
            t = type_param,
            l = limit_param,
        );

        let mut q = sqlx::query(&sql);
        for param in &compiled.params {
            q = q.bind(param);
        }
        let rows = q
            .bind(doc_type.map(|d| d.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row_to_candidate(row, ScoreMethod::Keyword))
            .collect()
    }

    async fn nearest_neighbors(
        &self,
        embedding: &[f32],
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        let vector = pgvector::Vector::from(embedding.to_vec());
        let rows = sqlx::query(
            "SELECT id, doc_type, title, (1 - (embedding <=> $1))::float8 AS score \
             FROM documents \
             WHERE embedding IS NOT NULL \
               AND ($2::text IS NULL OR doc_type = $2) \
             ORDER BY embedding <=> $1, id ASC \
             LIMIT $3",
        )
        .bind(&vector)
        .bind(doc_type.map(|d| d.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row_to_candidate(row, ScoreMethod::Semantic))
            .collect()
    }

    async fn pending_embeddings(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<PendingEmbedding>, VaultError> {
        let rows = sqlx::query(
            "SELECT id, title, content, revision FROM documents \
             WHERE embedding IS NULL AND ($1::text IS NULL OR id > $1) \
             ORDER BY id ASC LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingEmbedding {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    content: row.try_get("content")?,
                    revision: row.try_get("revision")?,
                })
            })
            .collect()
    }

    async fn commit_embeddings(&self, batch: &EmbeddingBatch) -> Result<CommitOutcome, VaultError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = CommitOutcome::default();

        for write in &batch.writes {
            let vector = pgvector::Vector::from(write.vector.clone());
            // Embedding metadata only: leaves updated_at and the trigger-watched columns alone
            let result = sqlx::query(
                "UPDATE documents SET embedding = $1, embedding_model = $2, \
                    embedding_status = 'complete', embedding_error = NULL, embedded_at = NOW() \
                 WHERE id = $3 AND revision = $4 AND embedding IS NULL",
            )
            .bind(&vector)
            .bind(&batch.model)
            .bind(&write.id)
            .bind(write.revision)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                outcome.written.push(write.id.clone());
            } else {
                outcome.stale.push(write.id.clone());
            }
        }

        for failure in &batch.failures {
            sqlx::query(
                "UPDATE documents SET embedding_status = 'failed', embedding_error = $1 \
                 WHERE id = $2 AND revision = $3 AND embedding IS NULL",
            )
            .bind(&failure.reason)
            .bind(&failure.id)
            .bind(failure.revision)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn embedding_stats(&self) -> Result<EmbeddingStats, VaultError> {
        let status_rows = sqlx::query(
            "SELECT embedding_status, COUNT(*) AS count FROM documents GROUP BY embedding_status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = EmbeddingStats::default();
        for row in &status_rows {
            let status: String = row.try_get("embedding_status")?;
            let count: i64 = row.try_get("count")?;
            stats.by_status.insert(status, count);
        }

        let model_rows = sqlx::query(
            "SELECT embedding_model, COUNT(*) AS count FROM documents \
             WHERE embedding IS NOT NULL GROUP BY embedding_model",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &model_rows {
            let model: Option<String> = row.try_get("embedding_model")?;
            let count: i64 = row.try_get("count")?;
            stats.by_model.insert(model.unwrap_or_else(|| "unknown".to_string()), count);
        }

        Ok(stats)
    }

    async fn remove_missing(&self, keep: &[String]) -> Result<u64, VaultError> {
        let result = sqlx::query(
            "DELETE FROM documents \
             WHERE (id LIKE 'pages/%' OR id LIKE 'journals/%') \
               AND NOT (id = ANY($1))",
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn invalidate_embeddings(&self) -> Result<u64, VaultError> {
        let result = sqlx::query(
            "UPDATE documents SET embedding = NULL, embedding_model = NULL, \
                embedding_status = 'pending', embedding_error = NULL, embedded_at = NULL \
             WHERE embedding IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
