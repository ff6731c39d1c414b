//! In-memory DocumentStore and scripted EmbeddingProvider shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use vaultsearch::config::SearchConfig;
use vaultsearch::embedding::pipeline::{BackfillOptions, BackfillPipeline};
use vaultsearch::embedding::{EmbeddingError, EmbeddingProvider, EmbeddingStatus};
use vaultsearch::errors::VaultError;
use vaultsearch::search::query::{Clause, KeywordQuery};
use vaultsearch::search::{ScoreMethod, ScoredCandidate};
use vaultsearch::store::{
    CommitOutcome, DocType, Document, DocumentStore, EmbeddingBatch, EmbeddingStats, NewDocument,
    PendingEmbedding,
};
use vaultsearch::VaultSearch;

pub const TEST_DIMENSION: usize = 16;

struct Entry {
    doc: Document,
    embedding: Option<Vec<f32>>,
}

/// Store that keeps documents in a BTreeMap and mirrors the Postgres semantics:
/// a title/content change bumps the revision and drops the embedding, and a
/// commit only writes vectors for rows still at the selected revision.
pub struct FakeStore {
    docs: Mutex<BTreeMap<String, Entry>>,
    failing_commits: AtomicUsize,
    fatal_commits: AtomicBool,
    edit_on_select: Mutex<Option<(String, String)>>,
    pub commit_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn clause_matches(clause: &Clause, doc_tokens: &[String]) -> bool {
    let wanted = tokens(clause.text());
    if wanted.is_empty() {
        return false;
    }
    match clause {
        Clause::Term(_) => wanted.iter().all(|w| doc_tokens.contains(w)),
        Clause::Phrase(_) => doc_tokens.windows(wanted.len()).any(|w| w == wanted.as_slice()),
    }
}

fn keyword_score(query: &KeywordQuery, doc_tokens: &[String]) -> Option<f64> {
    let positive: Vec<String> = match query {
        KeywordQuery::Plain(text) => {
            let wanted = tokens(text);
            if wanted.is_empty() || !wanted.iter().all(|w| doc_tokens.contains(w)) {
                return None;
            }
            wanted
        }
        KeywordQuery::Advanced(parsed) => {
            if !parsed.has_positive_clause()
                || !parsed.required.iter().all(|c| clause_matches(c, doc_tokens))
                || (!parsed.optional.is_empty()
                    && !parsed.optional.iter().any(|c| clause_matches(c, doc_tokens)))
                || parsed.excluded.iter().any(|c| clause_matches(c, doc_tokens))
            {
                return None;
            }
            parsed
                .required
                .iter()
                .chain(parsed.optional.iter())
                .flat_map(|c| tokens(c.text()))
                .collect()
        }
    };
    let hits = doc_tokens.iter().filter(|t| positive.contains(t)).count();
    Some(hits as f64 / doc_tokens.len() as f64)
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn sort_candidates(hits: &mut Vec<ScoredCandidate>, limit: i64) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(limit as usize);
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore {
            docs: Mutex::new(BTreeMap::new()),
            failing_commits: AtomicUsize::new(0),
            fatal_commits: AtomicBool::new(false),
            edit_on_select: Mutex::new(None),
            commit_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// Insert a page or journal whose id is derived from the title.
    pub fn add(&self, doc_type: DocType, title: &str, content: &str) -> String {
        let dir = match doc_type {
            DocType::Page => "pages",
            DocType::Journal => "journals",
        };
        let id = format!("{}/{}.md", dir, title);
        let mut docs = self.docs.lock().unwrap();
        Self::write(&mut docs, NewDocument {
            id: id.clone(),
            doc_type,
            title: title.to_string(),
            content: content.to_string(),
            modified_at: Utc::now(),
        });
        id
    }

    pub fn add_page(&self, title: &str, content: &str) -> String {
        self.add(DocType::Page, title, content)
    }

    fn write(docs: &mut BTreeMap<String, Entry>, input: NewDocument) -> Document {
        let now = Utc::now();
        let entry = docs.entry(input.id.clone()).or_insert_with(|| Entry {
            doc: Document {
                id: input.id.clone(),
                doc_type: input.doc_type,
                title: input.title.clone(),
                content: input.content.clone(),
                modified_at: input.modified_at,
                updated_at: now,
                revision: 1,
                embedding_status: EmbeddingStatus::Pending,
                embedding_model: None,
                has_embedding: false,
            },
            embedding: None,
        });

        if entry.doc.title != input.title || entry.doc.content != input.content {
            entry.doc.revision += 1;
            entry.doc.embedding_status = EmbeddingStatus::Pending;
            entry.doc.embedding_model = None;
            entry.doc.has_embedding = false;
            entry.embedding = None;
        }
        entry.doc.doc_type = input.doc_type;
        entry.doc.title = input.title;
        entry.doc.content = input.content.replace('\0', "");
        entry.doc.modified_at = input.modified_at;
        entry.doc.updated_at = now;
        entry.doc.clone()
    }

    /// Replace the content of an existing document, as an external editor would.
    pub fn edit(&self, id: &str, content: &str) {
        let mut docs = self.docs.lock().unwrap();
        Self::edit_locked(&mut docs, id, content);
    }

    fn edit_locked(docs: &mut BTreeMap<String, Entry>, id: &str, content: &str) {
        let current = docs.get(id).map(|e| e.doc.clone()).expect("document exists");
        Self::write(docs, NewDocument {
            id: current.id,
            doc_type: current.doc_type,
            title: current.title,
            content: content.to_string(),
            modified_at: Utc::now(),
        });
    }

    /// Edit `id` right after the next pending selection, before its vector is committed.
    pub fn edit_after_next_select(&self, id: &str, content: &str) {
        *self.edit_on_select.lock().unwrap() = Some((id.to_string(), content.to_string()));
    }

    /// Store a vector directly, bypassing the backfill.
    pub fn put_embedding(&self, id: &str, vector: Vec<f32>) {
        let mut docs = self.docs.lock().unwrap();
        let entry = docs.get_mut(id).expect("document exists");
        entry.embedding = Some(vector);
        entry.doc.has_embedding = true;
        entry.doc.embedding_status = EmbeddingStatus::Complete;
        entry.doc.embedding_model = Some("test".to_string());
    }

    pub fn embedding(&self, id: &str) -> Option<Vec<f32>> {
        self.docs.lock().unwrap().get(id).and_then(|e| e.embedding.clone())
    }

    pub fn document(&self, id: &str) -> Document {
        self.docs.lock().unwrap().get(id).map(|e| e.doc.clone()).expect("document exists")
    }

    /// Make the next `n` commits fail with a plain storage error.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail with a connection-level error.
    pub fn lose_connection_for_commits(&self, n: usize) {
        self.fatal_commits.store(true, Ordering::SeqCst);
        self.failing_commits.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn upsert(&self, input: NewDocument) -> Result<Document, VaultError> {
        let mut docs = self.docs.lock().unwrap();
        Ok(Self::write(&mut docs, input))
    }

    async fn get(&self, id: &str) -> Result<Document, VaultError> {
        self.docs
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.doc.clone())
            .ok_or_else(|| VaultError::NotFound { id: id.to_string() })
    }

    async fn count_by_type(&self) -> Result<BTreeMap<DocType, i64>, VaultError> {
        let mut counts = BTreeMap::new();
        for entry in self.docs.lock().unwrap().values() {
            *counts.entry(entry.doc.doc_type).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn keyword_search(
        &self,
        query: &KeywordQuery,
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.lock().unwrap();
        let mut hits: Vec<ScoredCandidate> = docs
            .values()
            .filter(|e| doc_type.map_or(true, |t| e.doc.doc_type == t))
            .filter_map(|e| {
                let doc_tokens = tokens(&format!("{} {}", e.doc.title, e.doc.content));
                keyword_score(query, &doc_tokens).map(|score| ScoredCandidate {
                    id: e.doc.id.clone(),
                    score,
                    method: ScoreMethod::Keyword,
                    title: e.doc.title.clone(),
                    doc_type: e.doc.doc_type,
                    snippet: None,
                })
            })
            .collect();
        sort_candidates(&mut hits, limit);
        Ok(hits)
    }

    async fn nearest_neighbors(
        &self,
        embedding: &[f32],
        limit: i64,
        doc_type: Option<DocType>,
    ) -> Result<Vec<ScoredCandidate>, VaultError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.lock().unwrap();
        let mut hits: Vec<ScoredCandidate> = docs
            .values()
            .filter(|e| doc_type.map_or(true, |t| e.doc.doc_type == t))
            .filter_map(|e| {
                e.embedding.as_ref().map(|v| ScoredCandidate {
                    id: e.doc.id.clone(),
                    score: cosine(embedding, v),
                    method: ScoreMethod::Semantic,
                    title: e.doc.title.clone(),
                    doc_type: e.doc.doc_type,
                    snippet: None,
                })
            })
            .collect();
        sort_candidates(&mut hits, limit);
        Ok(hits)
    }

    async fn pending_embeddings(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<PendingEmbedding>, VaultError> {
        let mut docs = self.docs.lock().unwrap();
        let pending: Vec<PendingEmbedding> = docs
            .values()
            .filter(|e| e.embedding.is_none())
            .filter(|e| after.map_or(true, |a| e.doc.id.as_str() > a))
            .take(limit as usize)
            .map(|e| PendingEmbedding {
                id: e.doc.id.clone(),
                title: e.doc.title.clone(),
                content: e.doc.content.clone(),
                revision: e.doc.revision,
            })
            .collect();

        if let Some((id, content)) = self.edit_on_select.lock().unwrap().take() {
            Self::edit_locked(&mut docs, &id, &content);
        }
        Ok(pending)
    }

    async fn commit_embeddings(&self, batch: &EmbeddingBatch) -> Result<CommitOutcome, VaultError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(if self.fatal_commits.load(Ordering::SeqCst) {
                VaultError::StoreUnavailable("connection reset".to_string())
            } else {
                VaultError::Storage("deadlock detected".to_string())
            });
        }

        let mut docs = self.docs.lock().unwrap();
        let mut outcome = CommitOutcome::default();
        for write in &batch.writes {
            match docs.get_mut(&write.id) {
                Some(e) if e.doc.revision == write.revision && e.embedding.is_none() => {
                    e.embedding = Some(write.vector.clone());
                    e.doc.has_embedding = true;
                    e.doc.embedding_status = EmbeddingStatus::Complete;
                    e.doc.embedding_model = Some(batch.model.clone());
                    outcome.written.push(write.id.clone());
                }
                _ => outcome.stale.push(write.id.clone()),
            }
        }
        for failure in &batch.failures {
            if let Some(e) = docs.get_mut(&failure.id) {
                if e.doc.revision == failure.revision && e.embedding.is_none() {
                    e.doc.embedding_status = EmbeddingStatus::Failed;
                }
            }
        }
        Ok(outcome)
    }

    async fn embedding_stats(&self) -> Result<EmbeddingStats, VaultError> {
        let mut stats = EmbeddingStats::default();
        for e in self.docs.lock().unwrap().values() {
            *stats.by_status.entry(e.doc.embedding_status.to_string()).or_insert(0) += 1;
            if let (Some(_), Some(model)) = (&e.embedding, &e.doc.embedding_model) {
                *stats.by_model.entry(model.clone()).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    async fn remove_missing(&self, keep: &[String]) -> Result<u64, VaultError> {
        let mut docs = self.docs.lock().unwrap();
        let before = docs.len();
        docs.retain(|id, _| {
            let in_vault = id.starts_with("pages/") || id.starts_with("journals/");
            !in_vault || keep.contains(id)
        });
        Ok((before - docs.len()) as u64)
    }

    async fn invalidate_embeddings(&self) -> Result<u64, VaultError> {
        let mut dropped = 0;
        for e in self.docs.lock().unwrap().values_mut() {
            if e.embedding.take().is_some() {
                dropped += 1;
            }
            e.doc.has_embedding = false;
            e.doc.embedding_model = None;
            e.doc.embedding_status = EmbeddingStatus::Pending;
        }
        Ok(dropped)
    }
}

/// Provider that hashes words into a small bag-of-words vector.
///
/// Texts containing a failure marker get an API error; texts containing an
/// outage marker (or every text, once `go_offline` is called) are unreachable.
pub struct ScriptedProvider {
    fail_markers: Mutex<HashSet<String>>,
    outage_markers: Mutex<HashSet<String>>,
    offline: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        ScriptedProvider {
            fail_markers: Mutex::new(HashSet::new()),
            outage_markers: Mutex::new(HashSet::new()),
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_when_contains(&self, marker: &str) {
        self.fail_markers.lock().unwrap().insert(marker.to_string());
    }

    pub fn unreachable_when_contains(&self, marker: &str) {
        self.outage_markers.lock().unwrap().insert(marker.to_string());
    }

    pub fn heal(&self) {
        self.fail_markers.lock().unwrap().clear();
        self.outage_markers.lock().unwrap().clear();
        self.offline.store(false, Ordering::SeqCst);
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector `embed` returns for `text`.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; TEST_DIMENSION];
        for token in tokens(text) {
            let bucket = token
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            v[bucket % TEST_DIMENSION] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst)
            || self.outage_markers.lock().unwrap().iter().any(|m| text.contains(m.as_str()))
        {
            return Err(EmbeddingError::Unavailable("connection refused".to_string()));
        }
        if self.fail_markers.lock().unwrap().iter().any(|m| text.contains(m.as_str())) {
            return Err(EmbeddingError::Api {
                status: 500,
                message: "model crashed".to_string(),
            });
        }
        Ok(Self::vector_for(text))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }
}

pub fn test_options() -> BackfillOptions {
    BackfillOptions {
        embed_timeout: Duration::from_secs(5),
        max_input_chars: 8000,
        write_retry_backoff: Duration::ZERO,
        max_consecutive_unreachable: 3,
    }
}

pub fn pipeline(store: &Arc<FakeStore>, provider: &Arc<ScriptedProvider>) -> BackfillPipeline {
    BackfillPipeline::new(store.clone(), provider.clone(), test_options())
}

pub fn service(store: &Arc<FakeStore>, provider: &Arc<ScriptedProvider>) -> VaultSearch {
    VaultSearch::with_options(store.clone(), provider.clone(), SearchConfig::default(), test_options())
}
