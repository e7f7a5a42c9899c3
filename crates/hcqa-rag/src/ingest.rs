//! Streaming document ingestion
//!
//! Producers hold an [`IngestHandle`] and push raw texts into a bounded
//! channel; each text gets its [`DocumentId`] at submission. A single
//! [`Ingestor`] task owns the write side of the store and the index: it
//! buffers records, embeds them with bounded concurrency and publishes
//! everything embedded so far once per commit interval.
//!
//! A commit writes the store first and then publishes one index snapshot,
//! so the index never references a document the store lacks. Removals go
//! the other way round.

use futures::stream::{self, StreamExt};
use hcqa_core::{Document, DocumentId, DocumentRecord, HcqaError, IngestConfig, Result};
use hcqa_vector::{EmbeddingClient, IndexBatch, VectorIndex};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::DocumentStore;

enum IngestCommand {
    Add {
        id: DocumentId,
        text: String,
    },
    Remove {
        id: DocumentId,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

// ============================================================================
// Statistics
// ============================================================================

/// Ingestion counters, shared between the handle and the task
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    committed: AtomicU64,
    dropped: AtomicU64,
    removed: AtomicU64,
    commits: AtomicU64,
}

impl IngestStats {
    pub fn report(&self) -> IngestReport {
        IngestReport {
            accepted: self.accepted.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Records accepted by a handle
    pub accepted: u64,
    /// Records published to the store and index
    pub committed: u64,
    /// Records abandoned after failing embedding
    pub dropped: u64,
    pub removed: u64,
    /// Index snapshots published
    pub commits: u64,
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable producer side of the ingestion channel
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
    next_id: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    stats: Arc<IngestStats>,
}

impl IngestHandle {
    /// Queue one document and return its id.
    ///
    /// Waits for channel capacity when the ingestor is behind.
    pub async fn submit(&self, text: impl Into<String>) -> Result<DocumentId> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(HcqaError::Ingestion("document text is empty".to_string()));
        }

        let id = DocumentId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.send(IngestCommand::Add { id, text }).await?;
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Queue several documents, ids in input order
    pub async fn submit_many<I, S>(&self, texts: I) -> Result<Vec<DocumentId>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids = Vec::new();
        for text in texts {
            ids.push(self.submit(text).await?);
        }
        Ok(ids)
    }

    /// Remove a committed or still-pending document
    pub async fn remove(&self, id: DocumentId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(IngestCommand::Remove { id, reply }).await?;
        rx.await.map_err(|_| closed())?
    }

    /// Resolve once everything submitted before this call is committed or
    /// dropped
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(IngestCommand::Flush { reply }).await?;
        rx.await.map_err(|_| closed())
    }

    /// Whether the ingestor task is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    pub fn stats(&self) -> IngestReport {
        self.stats.report()
    }

    async fn send(&self, command: IngestCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|_| closed())
    }
}

fn closed() -> HcqaError {
    HcqaError::Unavailable("ingestion is not running".to_string())
}

// ============================================================================
// Ingestor
// ============================================================================

struct PendingRecord {
    /// Arrival order at the ingestor
    seq: u64,
    id: DocumentId,
    text: String,
    attempts: u32,
}

/// Single writer for the document store and the vector index
pub struct Ingestor {
    rx: mpsc::Receiver<IngestCommand>,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<DocumentStore>,
    index: Arc<VectorIndex>,
    config: IngestConfig,
    running: Arc<AtomicBool>,
    stats: Arc<IngestStats>,
    pending: VecDeque<PendingRecord>,
    removals: Vec<(DocumentId, oneshot::Sender<Result<()>>)>,
    waiters: Vec<(u64, oneshot::Sender<()>)>,
    next_seq: u64,
}

/// Create the producer handle and the ingestor that serves it.
///
/// `embedder` should already carry its retry and cache policies.
pub fn channel(
    config: &IngestConfig,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<DocumentStore>,
    index: Arc<VectorIndex>,
) -> (IngestHandle, Ingestor) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let running = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(IngestStats::default());

    let handle = IngestHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
        running: Arc::clone(&running),
        stats: Arc::clone(&stats),
    };

    let ingestor = Ingestor {
        rx,
        embedder,
        store,
        index,
        config: config.clone(),
        running,
        stats,
        pending: VecDeque::new(),
        removals: Vec::new(),
        waiters: Vec::new(),
        next_seq: 0,
    };

    (handle, ingestor)
}

impl Ingestor {
    /// Serve commands until `shutdown` fires or every handle is dropped,
    /// then perform a final commit.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            commit_interval_ms = self.config.commit_interval_ms,
            max_batch_size = self.config.max_batch_size,
            "Ingestor started"
        );

        let period = self.config.commit_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.has_work() {
                        self.commit_cycle().await;
                    }
                }
                command = self.rx.recv() => match command {
                    Some(command) => {
                        let urgent = self.handle(command);
                        if urgent || self.pending.len() >= self.config.max_batch_size {
                            self.commit_cycle().await;
                        }
                    }
                    None => break,
                },
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            self.handle(command);
        }
        if self.has_work() {
            self.commit_cycle().await;
        }

        if !self.pending.is_empty() {
            warn!(
                count = self.pending.len(),
                "Abandoning records still failing embedding at shutdown"
            );
            self.stats
                .dropped
                .fetch_add(self.pending.len() as u64, Ordering::Relaxed);
            self.pending.clear();
        }
        self.resolve_waiters();

        let report = self.stats.report();
        info!(
            committed = report.committed,
            dropped = report.dropped,
            documents = self.store.len(),
            "Ingestor stopped"
        );
    }

    /// Buffer a command; returns whether it wants an immediate commit
    fn handle(&mut self, command: IngestCommand) -> bool {
        match command {
            IngestCommand::Add { id, text } => {
                self.pending.push_back(PendingRecord {
                    seq: self.next_seq,
                    id,
                    text,
                    attempts: 0,
                });
                self.next_seq += 1;
                false
            }
            IngestCommand::Remove { id, reply } => {
                self.removals.push((id, reply));
                false
            }
            IngestCommand::Flush { reply } => {
                self.waiters.push((self.next_seq, reply));
                true
            }
        }
    }

    fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.removals.is_empty() || !self.waiters.is_empty()
    }

    /// Attempt every buffered record once and publish what succeeded
    async fn commit_cycle(&mut self) {
        let mut removals = self.take_removals();
        let mut records: Vec<PendingRecord> = self.pending.drain(..).collect();
        let mut retry = Vec::new();
        let chunk_size = self.config.max_batch_size.max(1);

        while !records.is_empty() || !removals.is_empty() {
            let rest = records.split_off(chunk_size.min(records.len()));
            let chunk = std::mem::replace(&mut records, rest);

            let documents = self.embed_records(chunk, &mut retry).await;
            self.publish(documents, std::mem::take(&mut removals));
        }

        self.pending.extend(retry);
        self.resolve_waiters();
    }

    /// Removals of pending records are answered at once; the rest are
    /// returned for the next publish
    fn take_removals(&mut self) -> Vec<(DocumentId, oneshot::Sender<Result<()>>)> {
        let mut committed = Vec::new();

        for (id, reply) in std::mem::take(&mut self.removals) {
            if let Some(pos) = self.pending.iter().position(|r| r.id == id) {
                self.pending.remove(pos);
                self.stats.removed.fetch_add(1, Ordering::Relaxed);
                debug!(%id, "Removed pending record");
                let _ = reply.send(Ok(()));
            } else if self.store.contains(id) {
                committed.push((id, reply));
            } else {
                let _ = reply.send(Err(HcqaError::NotFound(format!("document {id}"))));
            }
        }

        committed
    }

    async fn embed_records(
        &self,
        records: Vec<PendingRecord>,
        retry: &mut Vec<PendingRecord>,
    ) -> Vec<Arc<Document>> {
        if records.is_empty() {
            return Vec::new();
        }

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let results: Vec<(PendingRecord, Result<Vec<f32>>)> =
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == records.len() => records
                    .into_iter()
                    .zip(vectors.into_iter().map(Ok))
                    .collect(),
                outcome => {
                    match outcome {
                        Err(e) => warn!(
                            count = records.len(),
                            error = %e,
                            "Batch embedding failed, embedding records one by one"
                        ),
                        Ok(vectors) => warn!(
                            count = records.len(),
                            received = vectors.len(),
                            "Batch embedding returned the wrong count, embedding records one by one"
                        ),
                    }
                    let embedder = &self.embedder;
                    stream::iter(records)
                        .map(|record| async move {
                            let outcome = embedder.embed(&record.text).await;
                            (record, outcome)
                        })
                        .buffered(self.config.embed_concurrency.max(1))
                        .collect()
                        .await
                }
            };

        let dimension = self.index.dimension();
        let mut documents = Vec::with_capacity(results.len());

        for (mut record, outcome) in results {
            match outcome {
                Ok(vector) if vector.len() == dimension && vector.iter().all(|x| x.is_finite()) => {
                    documents.push(Arc::new(Document::new(record.id, record.text, vector)));
                }
                Ok(vector) => {
                    error!(
                        id = %record.id,
                        dimension = vector.len(),
                        expected = dimension,
                        "Dropping record with unusable embedding"
                    );
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    record.attempts += 1;
                    if record.attempts >= self.config.max_ingest_attempts {
                        error!(
                            id = %record.id,
                            attempts = record.attempts,
                            error = %e,
                            "Dropping record after repeated embedding failures"
                        );
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    } else {
                        warn!(
                            id = %record.id,
                            attempts = record.attempts,
                            error = %e,
                            "Embedding failed, will retry next commit"
                        );
                        retry.push(record);
                    }
                }
            }
        }

        documents
    }

    fn publish(
        &self,
        documents: Vec<Arc<Document>>,
        removals: Vec<(DocumentId, oneshot::Sender<Result<()>>)>,
    ) {
        if documents.is_empty() && removals.is_empty() {
            return;
        }

        self.store.commit(&documents);

        let mut batch = IndexBatch::from_documents(documents.iter().cloned());
        for (id, _) in &removals {
            batch.remove(*id);
        }

        match self.index.commit(batch) {
            Ok(stats) => {
                for (id, reply) in removals {
                    self.store.remove(id);
                    let _ = reply.send(Ok(()));
                }
                self.stats
                    .committed
                    .fetch_add(stats.inserted as u64, Ordering::Relaxed);
                self.stats
                    .removed
                    .fetch_add(stats.removed as u64, Ordering::Relaxed);
                self.stats.commits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    generation = stats.generation,
                    inserted = stats.inserted,
                    removed = stats.removed,
                    compacted = stats.compacted,
                    "Committed ingestion batch"
                );
            }
            Err(e) => {
                error!(error = %e, count = documents.len(), "Index commit failed, rolling back batch");
                for document in &documents {
                    self.store.remove(document.id);
                }
                for (_, reply) in removals {
                    let _ = reply.send(Err(HcqaError::Ingestion(format!("commit failed: {e}"))));
                }
                self.stats
                    .dropped
                    .fetch_add(documents.len() as u64, Ordering::Relaxed);
            }
        }
    }

    /// Answer flushes whose records have all been committed or dropped
    fn resolve_waiters(&mut self) {
        let floor = self.pending.front().map_or(u64::MAX, |r| r.seq);
        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .waiters
            .drain(..)
            .partition(|(mark, _)| *mark <= floor);

        self.waiters = waiting;
        for (_, reply) in ready {
            let _ = reply.send(());
        }
    }
}

// ============================================================================
// JSON Lines
// ============================================================================

/// Valid documents and rejected line numbers of a JSON Lines payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLines {
    pub documents: Vec<String>,
    /// 1-based line numbers of malformed records
    pub rejected_lines: Vec<usize>,
}

/// Parse a complete JSON Lines payload. Blank lines are ignored.
pub fn parse_json_lines(input: &str) -> ParsedLines {
    let mut parsed = ParsedLines::default();

    for (i, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match DocumentRecord::parse(line) {
            Ok(record) => parsed.documents.push(record.doc),
            Err(_) => parsed.rejected_lines.push(i + 1),
        }
    }

    parsed
}

/// What a [`JsonLinesSource`] read before stopping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    /// Complete lines read
    pub lines: usize,
    pub accepted: usize,
    pub malformed: usize,
}

/// Reads `{"doc": "..."}` records from a JSON Lines file
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>, follow: bool, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            follow,
            poll_interval,
        }
    }

    /// Source for the configured path, if any
    pub fn from_config(config: &IngestConfig) -> Option<Self> {
        config
            .source_path
            .as_ref()
            .map(|path| Self::new(path, config.follow, config.poll_interval()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file into `handle`.
    ///
    /// In follow mode the source keeps polling for appended lines until
    /// `shutdown` fires; a trailing line without its newline is held back
    /// until the newline arrives. Otherwise it stops at end of file.
    pub async fn run(self, handle: IngestHandle, shutdown: CancellationToken) -> Result<SourceReport> {
        let mut report = SourceReport::default();

        let file = loop {
            match tokio::fs::File::open(&self.path).await {
                Ok(file) => break file,
                Err(e) if self.follow && e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "Waiting for document source to appear");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(report),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    return Err(HcqaError::Ingestion(format!(
                        "cannot open {}: {e}",
                        self.path.display()
                    )))
                }
            }
        };

        info!(path = %self.path.display(), follow = self.follow, "Reading documents");

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = reader.read_until(b'\n', &mut line) => read.map_err(|e| {
                    HcqaError::Ingestion(format!("reading {}: {e}", self.path.display()))
                })?,
            };

            if read == 0 {
                if !self.follow {
                    if !line.is_empty() {
                        report.lines += 1;
                        self.process_line(&line, report.lines, &handle, &mut report)
                            .await?;
                    }
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            }

            if line.last() != Some(&b'\n') {
                continue;
            }

            report.lines += 1;
            self.process_line(&line, report.lines, &handle, &mut report)
                .await?;
            line.clear();
        }

        info!(
            path = %self.path.display(),
            lines = report.lines,
            accepted = report.accepted,
            malformed = report.malformed,
            "Document source stopped"
        );
        Ok(report)
    }

    async fn process_line(
        &self,
        raw: &[u8],
        line_number: usize,
        handle: &IngestHandle,
        report: &mut SourceReport,
    ) -> Result<()> {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text.trim(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    line = line_number,
                    error = %e,
                    "Skipping record that is not UTF-8"
                );
                report.malformed += 1;
                return Ok(());
            }
        };
        if text.is_empty() {
            return Ok(());
        }

        match DocumentRecord::parse(text) {
            Ok(record) => {
                handle.submit(record.doc).await?;
                report.accepted += 1;
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    line = line_number,
                    error = %e,
                    "Skipping malformed record"
                );
                report.malformed += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hcqa_core::DistanceMetric;
    use hcqa_vector::{CompactionPolicy, HashingEmbedding};
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tokio::task::JoinHandle;

    struct Harness {
        handle: IngestHandle,
        store: Arc<DocumentStore>,
        index: Arc<VectorIndex>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(embedder: Arc<dyn EmbeddingClient>, config: IngestConfig) -> Harness {
        let store = Arc::new(DocumentStore::new());
        let index = Arc::new(VectorIndex::new(
            embedder.dimension(),
            DistanceMetric::Euclidean,
            CompactionPolicy::default(),
        ));
        let (handle, ingestor) = channel(&config, embedder, Arc::clone(&store), Arc::clone(&index));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(ingestor.run(shutdown.clone()));

        Harness {
            handle,
            store,
            index,
            shutdown,
            task,
        }
    }

    fn hashing() -> Arc<dyn EmbeddingClient> {
        Arc::new(HashingEmbedding::new(32))
    }

    /// Fails every call for texts containing "flaky" until `failures` calls
    struct FlakyEmbedder {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("flaky") && self.calls.fetch_add(1, Ordering::SeqCst) < self.failures
            {
                return Err(HcqaError::Embedding("provider unavailable".to_string()));
            }
            Ok(vec![text.len() as f32, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submitted_documents_become_visible_after_flush() {
        let h = start(hashing(), IngestConfig::default());

        let ids = h
            .handle
            .submit_many(["Aspirin treats headaches.", "Insulin regulates blood sugar."])
            .await
            .unwrap();
        assert!(ids[0] < ids[1]);

        h.handle.flush().await.unwrap();

        assert_eq!(h.store.len(), 2);
        assert_eq!(h.index.len(), 2);
        assert_eq!(
            h.store.get(ids[1]).unwrap().text,
            "Insulin regulates blood sugar."
        );
        assert_eq!(h.handle.stats().committed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_commit_without_flush() {
        let h = start(hashing(), IngestConfig::default());

        h.handle.submit("Aspirin treats headaches.").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.index.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        let h = start(hashing(), IngestConfig::default());
        assert!(matches!(
            h.handle.submit("   ").await,
            Err(HcqaError::Ingestion(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_embeddings_are_retried_on_later_commits() {
        let embedder = Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        let h = start(embedder, IngestConfig::default());

        let ok = h.handle.submit("steady").await.unwrap();
        let flaky = h.handle.submit("flaky one").await.unwrap();
        h.handle.flush().await.unwrap();

        assert!(h.store.contains(ok));
        assert!(h.store.contains(flaky));
        assert_eq!(h.index.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_are_dropped_after_max_attempts() {
        let embedder = Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
        });
        let config = IngestConfig {
            max_ingest_attempts: 3,
            ..Default::default()
        };
        let h = start(embedder, config);

        let flaky = h.handle.submit("always flaky").await.unwrap();
        h.handle.submit("fine").await.unwrap();
        h.handle.flush().await.unwrap();

        assert!(!h.store.contains(flaky));
        assert_eq!(h.index.len(), 1);
        assert_eq!(h.handle.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_committed_and_unknown() {
        let h = start(hashing(), IngestConfig::default());

        let id = h.handle.submit("Aspirin treats headaches.").await.unwrap();
        h.handle.flush().await.unwrap();

        h.handle.remove(id).await.unwrap();
        assert!(!h.store.contains(id));
        assert!(h.index.is_empty());

        assert!(matches!(
            h.handle.remove(id).await,
            Err(HcqaError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_performs_final_commit() {
        let h = start(hashing(), IngestConfig {
            commit_interval_ms: 60_000,
            ..Default::default()
        });

        h.handle.submit("Insulin regulates blood sugar.").await.unwrap();
        h.shutdown.cancel();
        h.task.await.unwrap();

        assert_eq!(h.index.len(), 1);
        assert!(!h.handle.is_running());
        assert!(matches!(
            h.handle.submit("late").await,
            Err(HcqaError::Unavailable(_))
        ));
    }

    /// Sleeps on every call so concurrent duplicates overlap
    struct SlowCounting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for SlowCounting {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_identical_documents_embed_once() {
        let inner = Arc::new(SlowCounting {
            calls: AtomicUsize::new(0),
        });
        let embedder = crate::embedder_with_policies(
            Arc::clone(&inner) as Arc<dyn EmbeddingClient>,
            hcqa_core::RetryPolicy::fixed(3, Duration::from_millis(10)),
            crate::EmbeddingCache::new("embedding", None),
        );
        let h = start(embedder, IngestConfig::default());

        let ids = h
            .handle
            .submit_many(vec!["Aspirin treats headaches."; 4])
            .await
            .unwrap();
        h.handle.flush().await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.index.len(), 4);
        assert!(ids.iter().all(|id| h.store.contains(*id)));
    }

    #[tokio::test]
    async fn test_zero_commit_interval_does_not_stop_ingestion() {
        let h = start(hashing(), IngestConfig {
            commit_interval_ms: 0,
            ..Default::default()
        });

        h.handle.submit("Aspirin treats headaches.").await.unwrap();
        h.handle.flush().await.unwrap();

        assert_eq!(h.index.len(), 1);
        assert!(h.handle.is_running());
    }

    #[test]
    fn test_parse_json_lines() {
        let input = "{\"doc\": \"Aspirin\"}\n\nnot json\n{\"doc\": \"\"}\n{\"doc\": \"Insulin\"}\n";
        let parsed = parse_json_lines(input);

        assert_eq!(parsed.documents, vec!["Aspirin", "Insulin"]);
        assert_eq!(parsed.rejected_lines, vec![3, 4]);
    }

    async fn wait_for(index: &VectorIndex, count: usize) {
        for _ in 0..500 {
            if index.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("index never reached {count} documents");
    }

    #[tokio::test]
    async fn test_static_source_skips_malformed_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"doc\": \"Aspirin treats headaches.\"}}").unwrap();
        writeln!(file, "{{\"text\": \"wrong field\"}}").unwrap();
        writeln!(file, "garbage").unwrap();
        write!(file, "{{\"doc\": \"Insulin regulates blood sugar.\"}}").unwrap();
        file.flush().unwrap();

        let h = start(hashing(), IngestConfig::default());
        let source = JsonLinesSource::new(file.path(), false, Duration::from_millis(10));
        let report = source
            .run(h.handle.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.lines, 4);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.malformed, 2);

        h.handle.flush().await.unwrap();
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn test_source_skips_lines_that_are_not_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"doc\": \"bad \xff\xfe bytes\"}\n").unwrap();
        writeln!(file, "{{\"doc\": \"Insulin regulates blood sugar.\"}}").unwrap();
        file.flush().unwrap();

        let h = start(hashing(), IngestConfig::default());
        let source = JsonLinesSource::new(file.path(), false, Duration::from_millis(10));
        let report = source
            .run(h.handle.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.lines, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.malformed, 1);

        h.handle.flush().await.unwrap();
        let texts: Vec<String> = h
            .index
            .snapshot()
            .documents()
            .map(|d| d.text.clone())
            .collect();
        assert_eq!(texts, vec!["Insulin regulates blood sugar."]);
    }

    #[tokio::test]
    async fn test_follow_mode_picks_up_appended_and_partial_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"doc\": \"Aspirin treats headaches.\"}}").unwrap();
        write!(file, "{{\"doc\": \"Insulin regul").unwrap();
        file.flush().unwrap();

        let h = start(hashing(), IngestConfig::default());
        let stop = CancellationToken::new();
        let source = JsonLinesSource::new(file.path(), true, Duration::from_millis(10));
        let reader = tokio::spawn(source.run(h.handle.clone(), stop.clone()));

        wait_for(&h.index, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.index.len(), 1);

        writeln!(file, "ates blood sugar.\"}}").unwrap();
        writeln!(file, "{{\"doc\": \"Ibuprofen reduces inflammation.\"}}").unwrap();
        file.flush().unwrap();

        wait_for(&h.index, 3).await;
        stop.cancel();
        let report = reader.await.unwrap().unwrap();

        assert_eq!(report.accepted, 3);
        assert_eq!(report.malformed, 0);
        let texts: Vec<String> = h
            .index
            .snapshot()
            .documents()
            .map(|d| d.text.clone())
            .collect();
        assert!(texts.contains(&"Insulin regulates blood sugar.".to_string()));
    }

    #[tokio::test]
    async fn test_missing_file_in_static_mode_is_an_error() {
        let h = start(hashing(), IngestConfig::default());
        let source = JsonLinesSource::new("/nonexistent/docs.jsonl", false, Duration::from_millis(10));
        assert!(matches!(
            source.run(h.handle.clone(), CancellationToken::new()).await,
            Err(HcqaError::Ingestion(_))
        ));
    }
}
