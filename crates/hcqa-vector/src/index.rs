//! In-memory vector index with copy-on-write snapshots
//!
//! The index is a list of immutable segments plus a tombstone map, wrapped
//! in an [`IndexSnapshot`]. A commit builds one new segment from the batch,
//! shares every existing segment with the previous snapshot and swaps the
//! snapshot pointer. Readers clone the current `Arc<IndexSnapshot>` and
//! scan it without holding any lock, so a query always sees whole batches.
//!
//! Small trailing segments are merged as they grow (size-tiered), and a
//! full compaction rewrites everything into one segment once the segment
//! count or the share of dead entries passes the [`CompactionPolicy`].

use crate::distance::distance;
use hcqa_core::{
    DistanceMetric, Document, DocumentId, HcqaError, IndexConfig, Neighbor, Result,
    RetrievalResult,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

// ============================================================================
// Policy and batches
// ============================================================================

/// When to rewrite the whole index into a single segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionPolicy {
    pub max_segments: usize,
    pub max_tombstone_ratio: f32,
}

impl CompactionPolicy {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            max_segments: config.max_segments.max(1),
            max_tombstone_ratio: config.max_tombstone_ratio,
        }
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

/// Inserts and removals published together by one commit
#[derive(Debug, Clone, Default)]
pub struct IndexBatch {
    inserts: Vec<Arc<Document>>,
    removals: Vec<DocumentId>,
}

impl IndexBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch of inserts only
    pub fn from_documents(documents: impl IntoIterator<Item = Arc<Document>>) -> Self {
        Self {
            inserts: documents.into_iter().collect(),
            removals: Vec::new(),
        }
    }

    pub fn insert(&mut self, document: Arc<Document>) -> &mut Self {
        self.inserts.push(document);
        self
    }

    pub fn remove(&mut self, id: DocumentId) -> &mut Self {
        self.removals.push(id);
        self
    }

    pub fn inserts(&self) -> &[Arc<Document>] {
        &self.inserts
    }

    pub fn removals(&self) -> &[DocumentId] {
        &self.removals
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.removals.is_empty()
    }
}

/// Outcome of one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitStats {
    /// Generation of the snapshot the commit published
    pub generation: u64,
    pub inserted: usize,
    pub removed: usize,
    /// Inserts that superseded a live entry with the same id
    pub replaced: usize,
    pub compacted: bool,
}

/// Point-in-time index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub generation: u64,
    pub live_entries: usize,
    pub dead_entries: usize,
    pub segments: usize,
    pub tombstones: usize,
    pub dimension: usize,
    pub metric: DistanceMetric,
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug)]
struct Segment {
    /// Generation of the newest commit folded into this segment
    generation: u64,
    entries: Vec<Arc<Document>>,
}

/// Immutable view of the index at one generation
#[derive(Debug)]
pub struct IndexSnapshot {
    generation: u64,
    segments: Vec<Arc<Segment>>,
    /// id -> generation before which entries with this id are dead
    tombstones: Arc<HashMap<DocumentId, u64>>,
    live: usize,
    dead: usize,
    dimension: usize,
    metric: DistanceMetric,
}

impl IndexSnapshot {
    fn empty(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            generation: 0,
            segments: Vec::new(),
            tombstones: Arc::new(HashMap::new()),
            live: 0,
            dead: 0,
            dimension,
            metric,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn is_live(&self, segment_generation: u64, id: DocumentId) -> bool {
        is_live(&self.tombstones, segment_generation, id)
    }

    /// Live documents, in no particular order
    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> + '_ {
        self.segments.iter().flat_map(move |segment| {
            segment
                .entries
                .iter()
                .filter(move |doc| self.is_live(segment.generation, doc.id))
        })
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            generation: self.generation,
            live_entries: self.live,
            dead_entries: self.dead,
            segments: self.segments.len(),
            tombstones: self.tombstones.len(),
            dimension: self.dimension,
            metric: self.metric,
        }
    }

    /// Exact k nearest neighbours of `vector`.
    ///
    /// Ordered by ascending distance, ties by ascending document id.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(HcqaError::InvalidArgument("k must be at least 1".to_string()));
        }
        if vector.len() != self.dimension {
            return Err(HcqaError::InvalidArgument(format!(
                "query vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(HcqaError::InvalidArgument(
                "query vector has non-finite components".to_string(),
            ));
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k.min(self.live) + 1);
        for document in self.documents() {
            let candidate = Candidate {
                distance: distance(self.metric, vector, &document.vector),
                document,
            };

            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        let neighbors = heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                document: Arc::clone(c.document),
                distance: c.distance,
            })
            .collect();

        Ok(RetrievalResult::new(neighbors))
    }
}

fn is_live(tombstones: &HashMap<DocumentId, u64>, segment_generation: u64, id: DocumentId) -> bool {
    tombstones
        .get(&id)
        .map_or(true, |&dead_before| segment_generation >= dead_before)
}

/// Heap entry; the greatest candidate is the worst match
struct Candidate<'a> {
    distance: f32,
    document: &'a Arc<Document>,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.document.id.cmp(&other.document.id))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

// ============================================================================
// Index
// ============================================================================

#[derive(Debug, Default)]
struct WriterState {
    live: HashSet<DocumentId>,
}

/// Single-writer, many-reader vector index
pub struct VectorIndex {
    dimension: usize,
    metric: DistanceMetric,
    policy: CompactionPolicy,
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<WriterState>,
}

impl VectorIndex {
    pub fn new(dimension: usize, metric: DistanceMetric, policy: CompactionPolicy) -> Self {
        info!(dimension, %metric, "Creating vector index");
        Self {
            dimension,
            metric,
            policy,
            current: RwLock::new(Arc::new(IndexSnapshot::empty(dimension, metric))),
            writer: Mutex::new(WriterState::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Current snapshot; stays valid for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().stats()
    }

    /// k nearest neighbours against the current snapshot
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        self.snapshot().query(vector, k)
    }

    /// Commit a single document
    pub fn insert(&self, document: Arc<Document>) -> Result<CommitStats> {
        self.commit(IndexBatch::from_documents([document]))
    }

    /// Tombstone a single document. Returns whether it was live.
    pub fn remove(&self, id: DocumentId) -> Result<bool> {
        let mut batch = IndexBatch::new();
        batch.remove(id);
        Ok(self.commit(batch)?.removed > 0)
    }

    /// Atomically publish a batch of inserts and removals.
    ///
    /// Removals apply before inserts. Inserting an id that is already live
    /// replaces the old entry, and if the batch holds the same id twice the
    /// later document wins. A batch containing any vector of the wrong
    /// dimension or with non-finite components is rejected whole.
    pub fn commit(&self, batch: IndexBatch) -> Result<CommitStats> {
        self.validate(&batch)?;

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let generation = current.generation + 1;

        let mut stats = CommitStats {
            generation: current.generation,
            ..Default::default()
        };
        let mut tombstones = Arc::clone(&current.tombstones);
        let mut dead = current.dead;

        for id in batch.removals {
            if writer.live.remove(&id) {
                Arc::make_mut(&mut tombstones).insert(id, generation);
                dead += 1;
                stats.removed += 1;
            } else {
                debug!(%id, "Removal of unknown document ignored");
            }
        }

        let mut seen = HashSet::new();
        let mut entries: Vec<Arc<Document>> = batch
            .inserts
            .into_iter()
            .rev()
            .filter(|doc| seen.insert(doc.id))
            .collect();
        entries.reverse();

        for doc in &entries {
            if !writer.live.insert(doc.id) {
                Arc::make_mut(&mut tombstones).insert(doc.id, generation);
                dead += 1;
                stats.replaced += 1;
            }
        }
        stats.inserted = entries.len();

        if entries.is_empty() && stats.removed == 0 {
            return Ok(stats);
        }
        stats.generation = generation;

        let mut segments = current.segments.clone();
        if !entries.is_empty() {
            segments.push(Arc::new(Segment {
                generation,
                entries,
            }));
        }

        // Size-tiered merging keeps the segment count logarithmic
        while segments.len() >= 2 {
            let n = segments.len();
            if segments[n - 1].entries.len() < segments[n - 2].entries.len() {
                break;
            }
            let (Some(newer), Some(older)) = (segments.pop(), segments.pop()) else {
                break;
            };
            let (merged, dropped) = merge(&[older, newer], &tombstones);
            dead -= dropped;
            if !merged.entries.is_empty() {
                segments.push(Arc::new(merged));
            }
        }

        let total = writer.live.len() + dead;
        let dead_ratio = if total == 0 {
            0.0
        } else {
            dead as f32 / total as f32
        };

        if segments.len() > self.policy.max_segments || dead_ratio > self.policy.max_tombstone_ratio
        {
            let (mut merged, _) = merge(&segments, &tombstones);
            merged.generation = generation;
            segments = if merged.entries.is_empty() {
                Vec::new()
            } else {
                vec![Arc::new(merged)]
            };
            tombstones = Arc::new(HashMap::new());
            dead = 0;
            stats.compacted = true;
        } else if dead == 0 && !tombstones.is_empty() {
            // No dead entries remain, so no tombstone can still hide anything
            tombstones = Arc::new(HashMap::new());
        }

        let next = Arc::new(IndexSnapshot {
            generation,
            segments,
            tombstones,
            live: writer.live.len(),
            dead,
            dimension: self.dimension,
            metric: self.metric,
        });

        debug!(
            generation,
            inserted = stats.inserted,
            removed = stats.removed,
            replaced = stats.replaced,
            segments = next.segments.len(),
            live = next.live,
            "Published index snapshot"
        );
        if stats.compacted {
            info!(generation, live = next.live, "Compacted vector index");
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        drop(writer);

        Ok(stats)
    }

    fn validate(&self, batch: &IndexBatch) -> Result<()> {
        for doc in &batch.inserts {
            if doc.vector.len() != self.dimension {
                return Err(HcqaError::InvalidArgument(format!(
                    "document {} has dimension {}, index expects {}",
                    doc.id,
                    doc.vector.len(),
                    self.dimension
                )));
            }
            if doc.vector.iter().any(|x| !x.is_finite()) {
                return Err(HcqaError::InvalidArgument(format!(
                    "document {} has non-finite vector components",
                    doc.id
                )));
            }
        }
        Ok(())
    }
}

/// Concatenate the live entries of `segments`, returning the dead count dropped
fn merge(segments: &[Arc<Segment>], tombstones: &HashMap<DocumentId, u64>) -> (Segment, usize) {
    let capacity = segments.iter().map(|s| s.entries.len()).sum();
    let mut entries = Vec::with_capacity(capacity);
    let mut generation = 0;
    let mut dropped = 0;

    for segment in segments {
        generation = generation.max(segment.generation);
        for doc in &segment.entries {
            if is_live(tombstones, segment.generation, doc.id) {
                entries.push(Arc::clone(doc));
            } else {
                dropped += 1;
            }
        }
    }

    (
        Segment {
            generation,
            entries,
        },
        dropped,
    )
}
