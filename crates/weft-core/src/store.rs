//! Document store seam.
//!
//! Documents persist keyed by `(type, url)`. Upserts are idempotent, so
//! at-least-once delivery never duplicates a document; re-crawls simply
//! overwrite.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::Result;
use crate::document::Document;

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum UpsertOutcome {
    /// No prior document existed under the key.
    Created,

    /// A prior document was overwritten.
    Updated,
}

/// Persists and recalls documents keyed by `(type, url)`.
///
/// Implementations must be concurrency-safe; the store is shared by
/// every worker loop.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Writes the document under its metadata key, overwriting any
    /// prior version.
    async fn upsert(&self, document: &Document) -> Result<UpsertOutcome>;

    /// Returns the stored ETag for the key, if any.
    async fn etag(&self, kind: &str, url: &str) -> Result<Option<String>>;

    /// Returns the stored document for the key, if any.
    async fn get(&self, kind: &str, url: &str) -> Result<Option<Document>>;
}

/// Simple in-memory [`Store`].
pub struct InMemStore {
    inner: Arc<Mutex<HashMap<(String, String), Document>>>,
}

impl InMemStore {
    /// Creates an empty [`InMemStore`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Clone for InMemStore {
    fn clone(&self) -> Self {
        let inner = self.inner.clone();
        Self { inner }
    }
}

impl Default for InMemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Store for InMemStore {
    async fn upsert(&self, document: &Document) -> Result<UpsertOutcome> {
        let key = (
            document.metadata.kind.clone(),
            document.metadata.url.clone(),
        );
        let guard = self.inner.lock();
        let mut lock = guard.expect("should not be already held");
        match lock.insert(key, document.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Created),
        }
    }

    async fn etag(&self, kind: &str, url: &str) -> Result<Option<String>> {
        let guard = self.inner.lock();
        let lock = guard.expect("should not be already held");
        let etag = lock
            .get(&(kind.to_owned(), url.to_owned()))
            .and_then(|document| document.metadata.etag.clone());
        Ok(etag)
    }

    async fn get(&self, kind: &str, url: &str) -> Result<Option<Document>> {
        let guard = self.inner.lock();
        let lock = guard.expect("should not be already held");
        Ok(lock.get(&(kind.to_owned(), url.to_owned())).cloned())
    }
}
