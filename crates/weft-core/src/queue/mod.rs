//! Named work queues and the [`QueueSet`] facade.
//!
//! The engine coordinates work through four named queues:
//!
//! - `priority` - operator-injected work, drained first
//! - `soon` - newly discovered pagination, drained before the backlog
//!   mutates under it
//! - `normal` - the traversal backlog
//! - `dead` - terminal queue for requests that exhausted their retry
//!   budget, inspected out of band
//!
//! Brokers bind through the [`Queue`] trait; [`InMemQueue`] is the
//! in-process reference binding.

mod memory;

use std::fmt;
use std::sync::Arc;

pub use memory::InMemQueue;

use crate::Result;
use crate::context::{Queuable, Request};

/// Names of the queues in a [`QueueSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum QueueName {
    /// Operator-injected work.
    #[display("priority")]
    Priority,

    /// Newly discovered pagination.
    #[display("soon")]
    Soon,

    /// The traversal backlog.
    #[display("normal")]
    Normal,

    /// Exhausted requests, terminal.
    #[display("dead")]
    Dead,
}

impl QueueName {
    /// Pop order: priority first, then eager pagination, then backlog.
    /// The dead queue is never popped.
    pub const POP_ORDER: [Self; 3] = [Self::Priority, Self::Soon, Self::Normal];

    /// All queue names, in display order.
    pub const ALL: [Self; 4] = [Self::Priority, Self::Soon, Self::Normal, Self::Dead];

    /// Returns the queue name as a string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Soon => "soon",
            Self::Normal => "normal",
            Self::Dead => "dead",
        }
    }
}

/// Broker receipt for one delivery of a queue entry.
///
/// Carried by the popped request so completion can ack or abandon the
/// exact delivery, and so requeues land back on the origin queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the entry was popped from.
    pub queue: QueueName,

    /// Broker-assigned receipt for this delivery.
    pub receipt: u64,
}

/// One named queue of serialized requests.
///
/// Implementations must be concurrency-safe: the queues are shared by
/// every worker loop in the process.
#[async_trait::async_trait]
pub trait Queue: Send + Sync {
    /// Appends an entry to the queue.
    async fn push(&self, entry: Queuable) -> Result<()>;

    /// Removes and returns the next entry plus its delivery receipt.
    ///
    /// Returns `None` when the queue is empty. The entry stays in
    /// flight until the receipt is resolved through [`done`](Queue::done)
    /// or [`abandon`](Queue::abandon).
    async fn pop(&self) -> Result<Option<(Queuable, u64)>>;

    /// Acknowledges a delivery, removing it from the broker.
    async fn done(&self, receipt: u64) -> Result<()>;

    /// Releases a delivery back to the queue for redelivery.
    async fn abandon(&self, receipt: u64) -> Result<()>;

    /// Returns the number of entries waiting in the queue.
    fn len(&self) -> usize;

    /// Returns `true` if no entries are waiting.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The four named queues behind one facade.
///
/// Cloning is cheap: clones share the underlying queues.
#[derive(Clone)]
pub struct QueueSet {
    prefix: String,
    priority: Arc<dyn Queue>,
    soon: Arc<dyn Queue>,
    normal: Arc<dyn Queue>,
    dead: Arc<dyn Queue>,
}

impl QueueSet {
    /// Creates a [`QueueSet`] over the given queue bindings.
    pub fn new(
        prefix: impl Into<String>,
        priority: Arc<dyn Queue>,
        soon: Arc<dyn Queue>,
        normal: Arc<dyn Queue>,
        dead: Arc<dyn Queue>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            priority,
            soon,
            normal,
            dead,
        }
    }

    /// Creates a [`QueueSet`] backed by in-memory queues.
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::new(
            prefix,
            Arc::new(InMemQueue::new()),
            Arc::new(InMemQueue::new()),
            Arc::new(InMemQueue::new()),
            Arc::new(InMemQueue::new()),
        )
    }

    fn of(&self, name: QueueName) -> &Arc<dyn Queue> {
        match name {
            QueueName::Priority => &self.priority,
            QueueName::Soon => &self.soon,
            QueueName::Normal => &self.normal,
            QueueName::Dead => &self.dead,
        }
    }

    /// Pops the next request, honoring priority order.
    ///
    /// Returns `None` when every poppable queue is empty.
    pub async fn pop(&self) -> Result<Option<Request>> {
        for name in QueueName::POP_ORDER {
            if let Some((entry, receipt)) = self.of(name).pop().await? {
                let delivery = Delivery {
                    queue: name,
                    receipt,
                };
                return Ok(Some(Request::from_queuable(entry, delivery)));
            }
        }
        Ok(None)
    }

    /// Pushes entries onto the named queue.
    pub async fn push(&self, entries: Vec<Queuable>, name: QueueName) -> Result<()> {
        let queue = self.of(name);
        for entry in entries {
            queue.push(entry).await?;
        }
        Ok(())
    }

    /// Pushes a requeued entry back onto its origin queue.
    ///
    /// The original delivery is left in flight; completion resolves it
    /// separately, preserving the broker receipt.
    pub async fn repush(&self, origin: Option<&Delivery>, entry: Queuable) -> Result<()> {
        let name = origin.map_or(QueueName::Normal, |delivery| delivery.queue);
        self.of(name).push(entry).await
    }

    /// Acknowledges the request's delivery. A request without a
    /// delivery (internal kinds) is a no-op.
    pub async fn done(&self, request: &Request) -> Result<()> {
        match &request.delivery {
            Some(delivery) => self.of(delivery.queue).done(delivery.receipt).await,
            None => Ok(()),
        }
    }

    /// Releases the request's delivery for redelivery. A request
    /// without a delivery is a no-op.
    pub async fn abandon(&self, request: &Request) -> Result<()> {
        match &request.delivery {
            Some(delivery) => self.of(delivery.queue).abandon(delivery.receipt).await,
            None => Ok(()),
        }
    }

    /// Pushes an exhausted or malformed entry onto the dead queue.
    pub async fn push_dead(&self, entry: Queuable) -> Result<()> {
        self.dead.push(entry).await
    }

    /// Returns the broker-level queue names, `<prefix>-<name>`.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        QueueName::ALL
            .iter()
            .map(|name| format!("{}-{name}", self.prefix))
            .collect()
    }

    /// Returns the number of entries waiting in the named queue.
    #[must_use]
    pub fn depth(&self, name: QueueName) -> usize {
        self.of(name).len()
    }
}

impl fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSet")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
