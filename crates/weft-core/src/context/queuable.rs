//! Serializable projection of a request.

use serde::{Deserialize, Serialize};

use crate::context::{Policy, RequestContext};

/// The queue entry form of a request.
///
/// This is the only request shape that crosses the broker: identity,
/// traversal context, policy, and the attempt count. Transient fields
/// (locks, promises, documents, responses) never serialize.
///
/// # Examples
///
/// ```
/// use weft_core::context::Queuable;
///
/// let entry = Queuable::new("repo", "https://api.example.com/repos/acme/widget");
/// let json = serde_json::to_string(&entry).unwrap();
/// let restored: Queuable = serde_json::from_str(&json).unwrap();
/// assert_eq!(restored, entry);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queuable {
    /// Resource type tag.
    #[serde(rename = "type")]
    pub kind: String,

    /// Absolute resource locator.
    pub url: String,

    /// Parent qualifiers and relation descriptors.
    #[serde(default)]
    pub context: RequestContext,

    /// Traversal policy, carried across requeues.
    #[serde(default)]
    pub policy: Policy,

    /// Delivery attempts so far.
    #[serde(rename = "attemptCount", default)]
    pub attempt_count: u32,
}

impl Queuable {
    /// Creates a queue entry with the default policy.
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            context: RequestContext::default(),
            policy: Policy::default(),
            attempt_count: 0,
        }
    }

    /// Creates a queue entry carrying the given policy.
    pub fn with_policy(
        kind: impl Into<String>,
        url: impl Into<String>,
        policy: Policy,
    ) -> Self {
        Self {
            policy,
            ..Self::new(kind, url)
        }
    }
}
