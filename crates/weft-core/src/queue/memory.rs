use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::Result;
use crate::context::Queuable;
use crate::queue::Queue;

/// Simple in-memory [`Queue`].
///
/// Entries pop in FIFO order. Popped entries move to an in-flight table
/// keyed by receipt; `done` drops them, `abandon` returns them to the
/// front of the queue for immediate redelivery.
pub struct InMemQueue {
    inner: Arc<InMemQueueInner>,
}

struct InMemQueueInner {
    buffer: Mutex<VecDeque<Queuable>>,
    pending: Mutex<HashMap<u64, Queuable>>,
    receipts: AtomicU64,
}

impl InMemQueue {
    /// Creates an empty [`InMemQueue`].
    pub fn new() -> Self {
        let inner = Arc::new(InMemQueueInner {
            buffer: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            receipts: AtomicU64::new(1),
        });

        Self { inner }
    }
}

impl Clone for InMemQueue {
    fn clone(&self) -> Self {
        let inner = self.inner.clone();
        Self { inner }
    }
}

impl Default for InMemQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Queue for InMemQueue {
    async fn push(&self, entry: Queuable) -> Result<()> {
        let guard = self.inner.buffer.lock();
        let mut lock = guard.expect("should not be already held");
        lock.push_back(entry);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<(Queuable, u64)>> {
        let entry = {
            let guard = self.inner.buffer.lock();
            let mut lock = guard.expect("should not be already held");
            lock.pop_front()
        };

        let Some(entry) = entry else {
            return Ok(None);
        };

        let receipt = self.inner.receipts.fetch_add(1, Ordering::Relaxed);
        let guard = self.inner.pending.lock();
        let mut lock = guard.expect("should not be already held");
        let _ = lock.insert(receipt, entry.clone());
        Ok(Some((entry, receipt)))
    }

    async fn done(&self, receipt: u64) -> Result<()> {
        let guard = self.inner.pending.lock();
        let mut lock = guard.expect("should not be already held");
        let _ = lock.remove(&receipt);
        Ok(())
    }

    async fn abandon(&self, receipt: u64) -> Result<()> {
        let entry = {
            let guard = self.inner.pending.lock();
            let mut lock = guard.expect("should not be already held");
            lock.remove(&receipt)
        };

        if let Some(entry) = entry {
            let guard = self.inner.buffer.lock();
            let mut lock = guard.expect("should not be already held");
            lock.push_front(entry);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        let guard = self.inner.buffer.lock();
        let lock = guard.expect("should not be already held");
        lock.len()
    }
}
