//! Committed documents by id
//!
//! The store owns the canonical `Arc<Document>` for every committed
//! record; the vector index shares the same allocations.

use hcqa_core::{Document, DocumentId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Concurrent map of committed documents
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<DocumentId, Arc<Document>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a batch of documents under a single write lock
    pub fn commit(&self, documents: &[Arc<Document>]) {
        let mut map = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        for document in documents {
            map.insert(document.id, Arc::clone(document));
        }
    }

    pub fn get(&self, id: DocumentId) -> Option<Arc<Document>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: DocumentId) -> Option<Arc<Document>> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
