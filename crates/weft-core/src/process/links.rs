//! Link helpers shared by the resource handlers.
//!
//! Every helper is best-effort: a missing payload field produces no link
//! and no enqueue rather than an error, so partially populated payloads
//! still yield useful documents.

use serde_json::Value;

use crate::context::{Queuable, Relation, Request};
use crate::document::{Document, Link, LinkKind, LinkTarget, Urn};
use crate::process::Processor;
use crate::queue::QueueName;

/// Reads an identifier-shaped payload field as a string.
pub(super) fn field_id(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Reads the `<name>_url` payload field, stripping URI-template
/// suffixes like `{/member}`.
pub(super) fn field_url(document: &Document, name: &str) -> Option<String> {
    let url = document.field(&format!("{name}_url"))?.as_str()?;
    Some(url.split('{').next().unwrap_or(url).to_owned())
}

/// Returns the document's own URN, set by a prior self link.
fn self_urn(document: &Document) -> Option<Urn> {
    match &document.link("self")?.href {
        LinkTarget::One(urn) => Some(urn.clone()),
        LinkTarget::Many(_) => None,
    }
}

impl Processor {
    /// Sets the `self` link to the root URN `urn:<type>:<id>`.
    pub(super) fn root_self_link(&self, request: &Request, document: &mut Document) {
        let Some(kind) = request.kind() else { return };
        let Some(id) = field_id(&document.content, "id") else {
            return;
        };
        let urn = Urn::root(kind, id);
        document.add_link("self", Link::one(LinkKind::SelfLink, urn));
    }

    /// Sets the `self` link to `<qualifier>:<type>:<key field>`,
    /// falling back to a root URN for unqualified requests.
    pub(super) fn qualified_self_link(&self, request: &Request, document: &mut Document, key: &str) {
        let Some(kind) = request.kind() else { return };
        let Some(id) = field_id(&document.content, key) else {
            return;
        };
        let urn = Urn::under(request.qualifier(), kind, id);
        document.add_link("self", Link::one(LinkKind::SelfLink, urn));
    }

    /// Sets the `siblings` link to the plural collection the document
    /// belongs to, nested under the qualifier when one is carried.
    pub(super) fn link_siblings(&self, request: &Request, document: &mut Document, plural: &str) {
        let urn = match request.qualifier() {
            Some(qualifier) => qualifier.segment(plural),
            None => Urn::from(format!("urn:{plural}")),
        };
        document.add_link("siblings", Link::one(LinkKind::Siblings, urn));
    }

    /// Links a single owned resource and enqueues it as a root.
    ///
    /// The target is taken from the `name` payload field (`id` + `url`),
    /// unless an explicit `url`/`urn` pair overrides it.
    pub(super) fn add_root(
        &self,
        request: &mut Request,
        document: &mut Document,
        name: &str,
        kind: &str,
        url: Option<&str>,
        urn: Option<Urn>,
    ) {
        let element = document.field(name).cloned();
        let urn = urn.or_else(|| {
            let id = field_id(element.as_ref()?, "id")?;
            Some(Urn::root(kind, id))
        });
        let url = url.map(str::to_owned).or_else(|| {
            element
                .as_ref()?
                .get("url")?
                .as_str()
                .map(str::to_owned)
        });
        let (Some(urn), Some(url)) = (urn, url) else {
            return;
        };

        document.add_link(name, Link::one(LinkKind::Resource, urn));
        request.queue_root(kind, &url);
    }

    /// Links an owned collection and enqueues its traversal.
    ///
    /// Collections of root entities enqueue without a qualifier; child
    /// collections nest their elements under this document's URN.
    pub(super) fn add_collection(
        &self,
        request: &mut Request,
        document: &mut Document,
        name: &str,
        kind: &str,
        url: Option<&str>,
    ) {
        let Some(parent) = self_urn(document) else { return };
        let url = url
            .map(str::to_owned)
            .or_else(|| field_url(document, name));
        let Some(url) = url else { return };

        document.add_link(name, Link::one(LinkKind::Collection, parent.segment(name)));

        let mut entry = Queuable::with_policy(name, url, request.policy.clone());
        if !Request::is_root_kind(kind) {
            entry.context.qualifier = Some(parent);
        }
        request.track(entry, QueueName::Normal);
    }

    /// Links a relation (a collection of unowned entities) and enqueues
    /// its traversal carrying a relation descriptor.
    pub(super) fn add_relation(
        &self,
        request: &mut Request,
        document: &mut Document,
        name: &str,
        kind: &str,
        url: Option<&str>,
    ) {
        let Some(parent) = self_urn(document) else { return };
        let url = url
            .map(str::to_owned)
            .or_else(|| field_url(document, name));
        let Some(url) = url else { return };

        document.add_link(name, Link::one(LinkKind::Relation, parent.pages(name)));

        let origin = request.kind().unwrap_or_default().to_owned();
        let mut entry = Queuable::with_policy(name, url, request.policy.clone());
        entry.context.qualifier = Some(parent);
        entry.context.relation = Some(Relation {
            origin,
            name: name.to_owned(),
            kind: kind.to_owned(),
        });
        request.track(entry, QueueName::Normal);
    }

    /// Annotates a relation page with its origin and element URNs.
    pub(super) fn process_relation(&self, request: &Request, document: &mut Document) {
        let Some(relation) = request.context.relation.clone() else {
            return;
        };
        let Some(qualifier) = request.qualifier().cloned() else {
            return;
        };

        document.add_link("origin", Link::one(LinkKind::Resource, qualifier.clone()));
        document.add_link(relation.origin.as_str(), Link::one(LinkKind::Resource, qualifier.clone()));
        document.add_link(
            "siblings",
            Link::one(LinkKind::Siblings, qualifier.pages(&relation.name)),
        );

        let urns: Vec<Urn> = document
            .elements()
            .into_iter()
            .flatten()
            .filter_map(|element| field_id(element, "id"))
            .map(|id| Urn::root(&relation.kind, id))
            .collect();
        document.add_link("resources", Link::many(LinkKind::Resource, urns));
    }
}
