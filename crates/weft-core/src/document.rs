//! Stored document form: payload plus link-annotated metadata.
//!
//! Every fetched resource is persisted as its remote payload with a
//! `_metadata` object merged in. The metadata carries the resource type,
//! source URL, fetch time, optional ETag, the processor version, and the
//! typed link multigraph that connects documents through stable URNs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable, content-addressed identifier crossing the document graph.
///
/// URNs follow `urn:<type>:<id>[:<subresource>…]` and are derived from
/// remote identifiers, so re-crawling a resource yields the same URN.
///
/// # Examples
///
/// ```
/// use weft_core::document::Urn;
///
/// let repo = Urn::root("repo", 42);
/// assert_eq!(repo.as_str(), "urn:repo:42");
///
/// let issue = repo.child("issue", 7);
/// assert_eq!(issue.as_str(), "urn:repo:42:issue:7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
    /// Creates a root URN: `urn:<kind>:<id>`.
    pub fn root(kind: &str, id: impl fmt::Display) -> Self {
        Self(format!("urn:{kind}:{id}"))
    }

    /// Creates a URN nested under `self`: `<self>:<kind>:<id>`.
    pub fn child(&self, kind: &str, id: impl fmt::Display) -> Self {
        Self(format!("{}:{kind}:{id}", self.0))
    }

    /// Creates a root or nested URN depending on the qualifier.
    ///
    /// Root entities ignore the parent scope; children nest under it.
    pub fn under(qualifier: Option<&Urn>, kind: &str, id: impl fmt::Display) -> Self {
        match qualifier {
            Some(parent) => parent.child(kind, id),
            None => Self::root(kind, id),
        }
    }

    /// Appends a plain segment: `<self>:<name>`.
    pub fn segment(&self, name: &str) -> Self {
        Self(format!("{}:{name}", self.0))
    }

    /// Creates a page URN: `<self>:<kind>:page:<number>`.
    pub fn page(&self, kind: &str, number: u32) -> Self {
        Self(format!("{}:{kind}:page:{number}", self.0))
    }

    /// Creates a pages URN for a named relation: `<self>:<name>:pages`.
    pub fn pages(&self, name: &str) -> Self {
        Self(format!("{}:{name}:pages", self.0))
    }

    /// Returns the URN as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Urn {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Urn {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Kind of a [`Link`] edge in the document graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// The document's own URN.
    #[serde(rename = "self")]
    SelfLink,

    /// The collection the document belongs to.
    Siblings,

    /// A single related resource.
    Resource,

    /// An owned collection of child resources.
    Collection,

    /// A collection of related, unowned resources.
    Relation,
}

/// Target of a [`Link`]: one URN or an ordered list of URNs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkTarget {
    /// A single URN.
    One(Urn),

    /// An ordered list of URNs.
    Many(Vec<Urn>),
}

/// Typed edge stored under `_metadata.links.<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Edge kind.
    #[serde(rename = "type")]
    pub kind: LinkKind,

    /// Edge target.
    pub href: LinkTarget,
}

impl Link {
    /// Creates a link to a single URN.
    pub fn one(kind: LinkKind, target: impl Into<Urn>) -> Self {
        Self {
            kind,
            href: LinkTarget::One(target.into()),
        }
    }

    /// Creates a link to an ordered list of URNs.
    pub fn many(kind: LinkKind, targets: Vec<Urn>) -> Self {
        Self {
            kind,
            href: LinkTarget::Many(targets),
        }
    }
}

/// Response headers preserved on the stored document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    /// Raw RFC 5988 `Link` header, kept for collection pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// The `_metadata` object merged into every stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Resource type tag (`org`, `repo`, `page`, …).
    #[serde(rename = "type")]
    pub kind: String,

    /// Absolute URL the document was fetched from.
    pub url: String,

    /// UTC fetch time, ISO 8601.
    #[serde(rename = "fetchedAt")]
    pub fetched_at: String,

    /// ETag of the fetched response, when the remote provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Typed link multigraph keyed by relation name.
    #[serde(default)]
    pub links: BTreeMap<String, Link>,

    /// Preserved response headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,

    /// Processor version that produced the links.
    ///
    /// Rolling upgrades re-process stored documents whose version lags.
    #[serde(default)]
    pub version: u32,
}

impl Metadata {
    /// Creates metadata for a freshly fetched document.
    pub fn new(kind: impl Into<String>, url: impl Into<String>, fetched_at: String) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            fetched_at,
            etag: None,
            links: BTreeMap::new(),
            headers: None,
            version: 0,
        }
    }
}

/// A persisted document: remote payload plus [`Metadata`].
///
/// Serializes as the payload object with `_metadata` merged in, the shape
/// stored documents take in the document store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// The remote payload. Arrays are wrapped as `{"elements": [...]}`
    /// before a document is built, so this is always a JSON object.
    pub content: Value,

    /// The merged `_metadata` object.
    pub metadata: Metadata,
}

impl Document {
    /// Creates a new [`Document`], wrapping array payloads as
    /// `{"elements": [...]}`.
    pub fn new(content: Value, metadata: Metadata) -> Self {
        Self {
            content: Self::wrap_elements(content),
            metadata,
        }
    }

    /// Wraps a JSON array as `{"elements": [...]}`; other values pass
    /// through unchanged.
    #[must_use]
    pub fn wrap_elements(value: Value) -> Value {
        match value {
            Value::Array(elements) => {
                let mut wrapped = serde_json::Map::with_capacity(1);
                wrapped.insert("elements".to_owned(), Value::Array(elements));
                Value::Object(wrapped)
            }
            other => other,
        }
    }

    /// Adds or replaces a link on the document's metadata.
    pub fn add_link(&mut self, name: impl Into<String>, link: Link) {
        let _ = self.metadata.links.insert(name.into(), link);
    }

    /// Returns the link registered under `name`, if any.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<&Link> {
        self.metadata.links.get(name)
    }

    /// Returns the payload field `name`, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.content.get(name)
    }

    /// Returns the wrapped collection elements, if this is a page.
    #[must_use]
    pub fn elements(&self) -> Option<&Vec<Value>> {
        self.content.get("elements").and_then(Value::as_array)
    }

    /// Renders the stored form: the payload with `_metadata` merged in.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let metadata = serde_json::to_value(&self.metadata)
            .expect("document metadata serializes to a JSON object");

        let mut object = match self.content.clone() {
            Value::Object(object) => object,
            other => {
                let mut object = serde_json::Map::with_capacity(2);
                object.insert("value".to_owned(), other);
                object
            }
        };
        object.insert("_metadata".to_owned(), metadata);
        Value::Object(object)
    }

    /// Splits a stored value back into payload and [`Metadata`].
    ///
    /// Returns `None` when the value has no well-formed `_metadata`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut object) = value else {
            return None;
        };
        let metadata = object.remove("_metadata")?;
        let metadata: Metadata = serde_json::from_value(metadata).ok()?;

        Some(Self {
            content: Value::Object(object),
            metadata,
        })
    }
}

impl Serialize for Document {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_value().serialize(serializer)
    }
}
