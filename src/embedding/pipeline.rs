/// Embedding backfill: populates missing vectors in bounded, transactional batches.
///
/// Documents without an embedding are visited in id order with keyset paging, so one run
/// touches each pending document once and a rerun picks up exactly what is still missing.
/// A failed embed call only fails that document. The job stops as an outage only after
/// several embed calls in a row could not reach the provider, counted across batch
/// boundaries so the batch size plays no part. Each batch is written back in one transaction,
/// retried once before its members are downgraded to failed for the next run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{build_embedding_text, embed_checked, EmbeddingProvider};
use crate::config::Config;
use crate::errors::VaultError;
use crate::store::{
    CommitOutcome, DocumentStore, EmbeddingBatch, EmbeddingFailure, EmbeddingWrite, PendingEmbedding,
};

/// Limits applied by the backfill.
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Upper bound for one embed call; a timeout fails that document
    pub embed_timeout: Duration,
    pub max_input_chars: usize,
    /// Pause before the single retry of a failed batch commit
    pub write_retry_backoff: Duration,
    /// Unreachable calls in a row that end the run; values below 2 are raised to 2
    pub max_consecutive_unreachable: usize,
}

impl BackfillOptions {
    pub fn from_config(config: &Config) -> Self {
        BackfillOptions {
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            max_input_chars: config.embedding.max_input_chars,
            write_retry_backoff: Duration::from_millis(config.backfill.write_retry_backoff_ms),
            max_consecutive_unreachable: config.backfill.max_consecutive_unreachable,
        }
    }
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counts for one backfill run. `attempted = succeeded + failed + stale`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Content changed between selection and commit; left for the next run
    pub stale: usize,
    pub batches: usize,
    /// Stopped early through the interrupt handle
    pub interrupted: bool,
}

/// Batch embedding job over an injected store and provider.
pub struct BackfillPipeline {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn EmbeddingProvider>,
    options: BackfillOptions,
    interrupt: Arc<AtomicBool>,
}

impl BackfillPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn EmbeddingProvider>,
        options: BackfillOptions,
    ) -> Self {
        BackfillPipeline {
            store,
            provider,
            options,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between batches. Setting it stops the run after the current batch
    /// commits; already committed batches are never rolled back.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Embed every document lacking a vector, `batch_size` documents at a time.
    pub async fn backfill(&self, batch_size: usize) -> Result<BackfillReport, VaultError> {
        self.backfill_with(batch_size, |_| {}).await
    }

    /// Like `backfill`, calling `observer` with the running totals after each batch.
    pub async fn backfill_with<F>(
        &self,
        batch_size: usize,
        mut observer: F,
    ) -> Result<BackfillReport, VaultError>
    where
        F: FnMut(&BackfillReport),
    {
        if batch_size == 0 {
            return Err(VaultError::validation("batch_size", "batch_size must be at least 1"));
        }

        let mut report = BackfillReport::default();
        let mut after: Option<String> = None;
        let mut unreachable_streak = 0usize;

        loop {
            if self.interrupt.load(Ordering::Relaxed) {
                tracing::info!(batches = report.batches, "Backfill interrupted between batches");
                report.interrupted = true;
                break;
            }

            let pending = self
                .store
                .pending_embeddings(after.as_deref(), batch_size as i64)
                .await?;
            let Some(last) = pending.last() else {
                break;
            };
            after = Some(last.id.clone());
            report.batches += 1;
            report.attempted += pending.len();

            let batch = self.embed_batch(&pending, &mut unreachable_streak).await?;

            match self.commit_with_retry(&batch).await {
                Ok(outcome) => {
                    report.succeeded += outcome.written.len();
                    report.stale += outcome.stale.len();
                    report.failed += batch.failures.len();
                    tracing::debug!(
                        batch = report.batches,
                        written = outcome.written.len(),
                        stale = outcome.stale.len(),
                        failed = batch.failures.len(),
                        "Backfill batch committed"
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(
                        batch = report.batches,
                        documents = pending.len(),
                        error = %e,
                        "Batch commit failed twice, documents left pending for the next run"
                    );
                    report.failed += pending.len();
                }
            }

            observer(&report);

            // Fewer than a full page means the pending set is exhausted
            if pending.len() < batch_size {
                break;
            }
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            stale = report.stale,
            batches = report.batches,
            "Embedding backfill finished"
        );

        Ok(report)
    }

    /// Embed each document in turn and collect the batch to commit.
    ///
    /// `unreachable_streak` carries the run of unreachable calls over from earlier
    /// batches; any call that reaches the provider resets it. Reaching the limit
    /// fails the run with `ProviderUnavailable`, leaving this batch uncommitted.
    async fn embed_batch(
        &self,
        pending: &[PendingEmbedding],
        unreachable_streak: &mut usize,
    ) -> Result<EmbeddingBatch, VaultError> {
        let limit = self.options.max_consecutive_unreachable.max(2);
        let mut batch = EmbeddingBatch {
            model: self.provider.model_name().to_string(),
            ..Default::default()
        };

        for doc in pending {
            let text = build_embedding_text(&doc.title, &doc.content, self.options.max_input_chars);
            match embed_checked(self.provider.as_ref(), &text, self.options.embed_timeout).await {
                Ok(vector) => {
                    *unreachable_streak = 0;
                    batch.writes.push(EmbeddingWrite {
                        id: doc.id.clone(),
                        revision: doc.revision,
                        vector,
                    });
                }
                Err(e) => {
                    if e.is_unavailable() {
                        *unreachable_streak += 1;
                        if *unreachable_streak >= limit {
                            tracing::error!(
                                document_id = %doc.id,
                                consecutive = *unreachable_streak,
                                error = %e,
                                "Embedding provider unreachable, stopping backfill"
                            );
                            return Err(VaultError::ProviderUnavailable(format!(
                                "{} embedding calls in a row failed to reach the provider: {}",
                                unreachable_streak, e
                            )));
                        }
                    } else {
                        *unreachable_streak = 0;
                    }
                    tracing::warn!(
                        document_id = %doc.id,
                        error = %e,
                        "Embedding failed, document left for a later backfill"
                    );
                    batch.failures.push(EmbeddingFailure {
                        id: doc.id.clone(),
                        revision: doc.revision,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(batch)
    }

    async fn commit_with_retry(&self, batch: &EmbeddingBatch) -> Result<CommitOutcome, VaultError> {
        match self.store.commit_embeddings(batch).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_in_ms = self.options.write_retry_backoff.as_millis() as u64,
                    "Batch commit failed, retrying once"
                );
                tokio::time::sleep(self.options.write_retry_backoff).await;
                self.store.commit_embeddings(batch).await
            }
        }
    }
}
