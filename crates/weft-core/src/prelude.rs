//! A convenience module that re-exports commonly used items.
//!
//! This module is intended to be glob-imported for convenience:
//!
//! ```
//! use weft_core::prelude::*;
//! ```

// HTTP types
pub use http;

#[doc(hidden)]
pub use crate::async_trait;
pub use crate::config::{ConfigHandle, Options, PatchOp};
pub use crate::context::{
    Disposition, FetchBehavior, Freshness, MAX_ATTEMPTS, Meta, Outcome, Policy, Queuable,
    Relation, Request, RequestContext, RequestKind,
};
pub use crate::crawler::Crawler;
pub use crate::daemon::{LoopHandle, LoopSupervisor, STOP_SENTINEL, WorkerLoop};
pub use crate::document::{Document, Headers, Link, LinkKind, LinkTarget, Metadata, Urn};
pub use crate::fetch::{FetchResponse, Fetcher};
pub use crate::lock::{InMemLockService, Lease, LockService};
pub use crate::process::Processor;
pub use crate::queue::{Delivery, InMemQueue, Queue, QueueName, QueueSet};
pub use crate::store::{InMemStore, Store, UpsertOutcome};
pub use crate::{BoxError, Error, ErrorKind, Result};
