//! The traversal unit and its lifecycle state.
//!
//! A [`Request`] is owned by exactly one worker loop between queue pop
//! and ack/abandon. Pipeline stages take the request, mark outcomes and
//! dispositions on it, and hand it forward; nothing about a request is
//! shared between loops.

pub mod policy;
mod queuable;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use policy::{FetchBehavior, Freshness, Policy};
pub use queuable::Queuable;

use crate::Result;
use crate::document::{Document, Urn};
use crate::fetch::FetchResponse;
use crate::lock::Lease;
use crate::queue::{Delivery, QueueName};

/// Delivery attempts a request may consume before dead-lettering.
pub const MAX_ATTEMPTS: u32 = 5;

/// Collection type tags and the element type each one paginates.
const COLLECTIONS: &[(&str, &str)] = &[
    ("orgs", "org"),
    ("repos", "repo"),
    ("users", "user"),
    ("teams", "team"),
    ("commits", "commit"),
    ("issues", "issue"),
    ("issue_comments", "issue_comment"),
    ("comments", "issue_comment"),
    ("members", "user"),
    ("collaborators", "user"),
];

/// Types addressed by root URNs; everything else nests under a qualifier.
const ROOTS: &[&str] = &[
    "org", "orgs", "repo", "repos", "team", "teams", "user", "users",
];

/// Identity of a request: a remote resource or an internal marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// A remote resource to fetch and process.
    Resource {
        /// Resource type tag.
        kind: String,
        /// Absolute resource locator.
        url: String,
    },

    /// Synthesized when the queues are exhausted; induces a polling
    /// delay and touches no collaborator.
    Blank,

    /// Synthesized when a cycle fails before a request exists.
    ErrorTrap,
}

/// Relation descriptor carried by requests derived from `_addRelation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Type tag of the resource that owns the relation.
    pub origin: String,

    /// Relation name (`teams`, `collaborators`, …).
    pub name: String,

    /// Element type of the related collection.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Free-form traversal context carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    /// URN prefix identifying the parent scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<Urn>,

    /// Relation descriptor for relation pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,

    /// Element type for explicit `collection` requests.
    #[serde(rename = "subType", skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,

    /// Forces rehydration on a matching ETag.
    pub force: bool,
}

/// Final disposition of a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Outcome {
    /// The document was processed and stored.
    Processed,

    /// The request was skipped (unmodified, filtered, excluded).
    Skipped,

    /// The request was pushed back for redelivery.
    Requeued,

    /// The request failed; the message carries the error shape.
    Error,
}

/// Pipeline control state of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Continue through the remaining stages.
    #[default]
    Continue,

    /// Skip the remaining stages; ack normally.
    Skip,

    /// Skip the remaining stages; redeliver.
    Requeue,
}

/// Per-stage timings and counters accumulated on a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Meta(BTreeMap<String, Value>);

impl Meta {
    /// Records a value under `key`, replacing any prior value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let _ = self.0.insert(key.to_owned(), value.into());
    }

    /// Returns the value recorded under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns `true` when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// The in-flight traversal unit.
///
/// Created from a popped [`Queuable`] (or synthesized for internal
/// kinds), threaded through the pipeline stages, and resolved exactly
/// once against the queue broker.
pub struct Request {
    kind: RequestKind,

    /// Parent qualifiers and relation descriptors.
    pub context: RequestContext,

    /// Traversal policy.
    pub policy: Policy,

    /// Delivery attempts so far; bounded by [`MAX_ATTEMPTS`].
    pub attempt_count: u32,

    /// Raw payload set by the fetcher.
    pub payload: Option<Value>,

    /// Response metadata set by the fetcher.
    pub response: Option<FetchResponse>,

    /// Converted, link-annotated document.
    pub document: Option<Document>,

    disposition: Disposition,
    outcome: Option<Outcome>,
    message: Option<String>,

    /// Per-stage timings and counters.
    pub meta: Meta,

    /// Side-effect handles joined before the request is acked.
    pub promises: Vec<JoinHandle<Result<()>>>,

    /// Work discovered by the processor, flushed by the crawler.
    pub enqueues: Vec<(Queuable, QueueName)>,

    /// Lease on the URL, present iff granted.
    pub lock: Option<Lease>,

    /// Broker receipt for ack/abandon/repush.
    pub delivery: Option<Delivery>,

    /// Wall-clock acquisition time.
    pub start: Option<jiff::Timestamp>,

    /// Owning worker loop, for diagnostics.
    pub loop_name: String,

    /// Earliest instant the owning loop may dequeue its next request.
    pub next_request_time: Option<Instant>,
}

impl Request {
    fn with_kind(kind: RequestKind) -> Self {
        Self {
            kind,
            context: RequestContext::default(),
            policy: Policy::default(),
            attempt_count: 0,
            payload: None,
            response: None,
            document: None,
            disposition: Disposition::Continue,
            outcome: None,
            message: None,
            meta: Meta::default(),
            promises: Vec::new(),
            enqueues: Vec::new(),
            lock: None,
            delivery: None,
            start: None,
            loop_name: String::new(),
            next_request_time: None,
        }
    }

    /// Creates a resource request with the default policy.
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_kind(RequestKind::Resource {
            kind: kind.into(),
            url: url.into(),
        })
    }

    /// Creates a blank internal request.
    pub fn blank() -> Self {
        Self::with_kind(RequestKind::Blank)
    }

    /// Creates an error-trap internal request.
    pub fn error_trap() -> Self {
        Self::with_kind(RequestKind::ErrorTrap)
    }

    /// Restores a request from its queue entry and broker receipt.
    pub fn from_queuable(entry: Queuable, delivery: Delivery) -> Self {
        let mut request = Self::new(entry.kind, entry.url);
        request.context = entry.context;
        request.policy = entry.policy;
        request.attempt_count = entry.attempt_count;
        request.delivery = Some(delivery);
        request
    }

    /// Returns the resource type tag, or `None` for internal requests.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::Resource { kind, .. } => Some(kind),
            RequestKind::Blank | RequestKind::ErrorTrap => None,
        }
    }

    /// Returns the resource locator, or `None` for internal requests.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::Resource { url, .. } => Some(url),
            RequestKind::Blank | RequestKind::ErrorTrap => None,
        }
    }

    /// Returns `true` for the internal marker kinds.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.kind, RequestKind::Blank | RequestKind::ErrorTrap)
    }

    /// Returns `true` if `kind` is addressed by root URNs.
    #[must_use]
    pub fn is_root_kind(kind: &str) -> bool {
        ROOTS.contains(&kind)
    }

    /// Returns the element type if this request names a collection.
    ///
    /// Explicit `collection` requests carry the element type as
    /// `context.subType`; plural type tags map through a fixed table.
    #[must_use]
    pub fn collection_element_kind(&self) -> Option<&str> {
        let kind = self.kind()?;
        if kind == "collection" {
            return self.context.sub_type.as_deref();
        }
        COLLECTIONS
            .iter()
            .find(|(collection, _)| *collection == kind)
            .map(|(_, element)| *element)
    }

    /// Returns the type tag the fetcher keys ETags under.
    ///
    /// Collections fetch as pages; everything else fetches as itself.
    #[must_use]
    pub fn fetch_kind(&self) -> Option<&str> {
        if self.collection_element_kind().is_some() {
            return Some("page");
        }
        self.kind()
    }

    /// Returns the parent qualifier, if one is carried.
    #[must_use]
    pub fn qualifier(&self) -> Option<&Urn> {
        self.context.qualifier.as_ref()
    }

    /// Marks the request skipped. The first mark wins; a pending
    /// requeue is never downgraded.
    pub fn mark_skip(&mut self, outcome: Outcome, message: impl Into<String>) {
        if self.disposition != Disposition::Continue {
            return;
        }
        self.disposition = Disposition::Skip;
        self.outcome = Some(outcome);
        self.message = Some(message.into());
    }

    /// Marks the request for redelivery, superseding any earlier mark.
    pub fn mark_requeue(&mut self, outcome: Outcome, message: impl Into<String>) {
        self.disposition = Disposition::Requeue;
        self.outcome = Some(outcome);
        self.message = Some(message.into());
    }

    /// Returns `true` when the remaining pipeline stages should be
    /// passed through.
    #[must_use]
    pub fn should_skip(&self) -> bool {
        self.disposition != Disposition::Continue
    }

    /// Returns `true` when the request must be redelivered.
    #[must_use]
    pub fn should_requeue(&self) -> bool {
        self.disposition == Disposition::Requeue
    }

    /// Records the terminal outcome for a request no earlier stage
    /// marked.
    pub fn mark_processed(&mut self) {
        if self.outcome.is_none() {
            self.outcome = Some(Outcome::Processed);
        }
    }

    /// Returns the recorded outcome.
    #[must_use]
    pub const fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Returns the outcome message.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Projects the request onto its serializable queue entry.
    ///
    /// Returns `None` for internal requests, which never re-enter the
    /// broker.
    #[must_use]
    pub fn queuable(&self) -> Option<Queuable> {
        let RequestKind::Resource { kind, url } = &self.kind else {
            return None;
        };
        Some(Queuable {
            kind: kind.clone(),
            url: url.clone(),
            context: self.context.clone(),
            policy: self.policy.clone(),
            attempt_count: self.attempt_count,
        })
    }

    /// Records discovered work for the crawler to flush.
    pub fn track(&mut self, entry: Queuable, queue: QueueName) {
        self.enqueues.push((entry, queue));
    }

    /// Enqueues a root entity, carrying this request's policy.
    pub fn queue_root(&mut self, kind: &str, url: &str) {
        let entry = Queuable::with_policy(kind, url, self.policy.clone());
        self.track(entry, QueueName::Normal);
    }

    /// Enqueues a child entity nested under `qualifier`.
    pub fn queue_child(&mut self, kind: &str, url: &str, qualifier: Option<Urn>) {
        let mut entry = Queuable::with_policy(kind, url, self.policy.clone());
        entry.context.qualifier = qualifier;
        self.track(entry, QueueName::Normal);
    }

    /// Enqueues one element of a collection page: roots by identity,
    /// children nested under the page's qualifier.
    pub fn queue_collection_element(&mut self, kind: &str, url: &str, qualifier: Option<Urn>) {
        if Self::is_root_kind(kind) {
            self.queue_root(kind, url);
        } else {
            self.queue_child(kind, url, qualifier);
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("attempt_count", &self.attempt_count)
            .field("disposition", &self.disposition)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_requests_have_no_identity() {
        let blank = Request::blank();
        assert!(blank.is_internal());
        assert!(blank.kind().is_none());
        assert!(blank.url().is_none());
        assert!(blank.queuable().is_none());
    }

    #[test]
    fn first_skip_wins() {
        let mut request = Request::new("repo", "https://api.example.com/repos/acme/widget");
        request.mark_skip(Outcome::Skipped, "Unmodified");
        request.mark_skip(Outcome::Error, "later");
        assert_eq!(request.outcome(), Some(Outcome::Skipped));
        assert_eq!(request.message(), Some("Unmodified"));
    }

    #[test]
    fn requeue_supersedes_skip() {
        let mut request = Request::new("repo", "https://api.example.com/repos/acme/widget");
        request.mark_skip(Outcome::Skipped, "Filtered");
        request.mark_requeue(Outcome::Error, "store failed");
        assert!(request.should_requeue());
        assert_eq!(request.outcome(), Some(Outcome::Error));
    }

    #[test]
    fn queuable_projection_preserves_identity_and_drops_transients() {
        let mut request = Request::new("issue", "https://api.example.com/issues/7");
        request.context.qualifier = Some(Urn::root("repo", 42));
        request.attempt_count = 2;
        request.payload = Some(serde_json::json!({"id": 7}));
        request.loop_name = "crawler-1".to_owned();

        let entry = request.queuable().unwrap();
        assert_eq!(entry.kind, "issue");
        assert_eq!(entry.url, "https://api.example.com/issues/7");
        assert_eq!(entry.attempt_count, 2);
        assert_eq!(entry.context, request.context);
        assert_eq!(entry.policy, request.policy);

        let value = serde_json::to_value(&entry).unwrap();
        let fields: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(fields, ["attemptCount", "context", "policy", "type", "url"]);
    }

    #[test]
    fn collection_tables() {
        let issues = Request::new("issues", "https://api.example.com/repos/acme/widget/issues");
        assert_eq!(issues.collection_element_kind(), Some("issue"));
        assert_eq!(issues.fetch_kind(), Some("page"));

        let mut generic = Request::new("collection", "https://api.example.com/things");
        generic.context.sub_type = Some("thing".to_owned());
        assert_eq!(generic.collection_element_kind(), Some("thing"));

        let repo = Request::new("repo", "https://api.example.com/repos/acme/widget");
        assert_eq!(repo.collection_element_kind(), None);
        assert_eq!(repo.fetch_kind(), Some("repo"));
    }

    #[test]
    fn collection_elements_route_roots_and_children() {
        let mut page = Request::new("issues", "https://api.example.com/repos/acme/widget/issues");
        let qualifier = Urn::root("repo", 42);

        page.queue_collection_element("user", "https://api.example.com/users/9", Some(qualifier.clone()));
        page.queue_collection_element("issue", "https://api.example.com/issues/7", Some(qualifier.clone()));

        let (root, _) = &page.enqueues[0];
        assert!(root.context.qualifier.is_none());

        let (child, _) = &page.enqueues[1];
        assert_eq!(child.context.qualifier.as_ref(), Some(&qualifier));
    }
}
