//! Handlers for webhook event documents.
//!
//! Events are processed best-effort: payload sub-fields vary by event
//! age and delivery path, and a missing field means no link rather than
//! a failure. Referenced root entities are enqueued so the graph catches
//! up with whatever the event mentions.

use serde_json::Value;

use crate::context::Request;
use crate::document::{Document, Link, LinkKind, Urn};
use crate::process::Processor;
use crate::process::links::field_id;

/// Derives the event's qualifier from its repo or org payload stanza.
fn event_qualifier(document: &Document) -> Option<Urn> {
    if let Some(repo) = document.field("repo") {
        if let Some(id) = field_id(repo, "id") {
            return Some(Urn::root("repo", id));
        }
    }
    if let Some(org) = document.field("org") {
        if let Some(id) = field_id(org, "id") {
            return Some(Urn::root("org", id));
        }
    }
    None
}

impl Processor {
    /// Handles any `<Name>Event` document.
    ///
    /// The shared part links the event itself plus its actor, repo, and
    /// org, enqueuing each referenced root. Event-specific payload
    /// fields then link into the qualifier's URN space.
    pub(super) fn event(&self, request: &mut Request, document: &mut Document) {
        let Some(kind) = request.kind().map(str::to_owned) else {
            return;
        };
        let qualifier = event_qualifier(document).or_else(|| request.qualifier().cloned());

        if let (Some(qualifier), Some(id)) = (&qualifier, field_id(&document.content, "id")) {
            document.add_link("self", Link::one(LinkKind::SelfLink, qualifier.child(&kind, id)));
        }

        self.add_root(request, document, "actor", "user", None, None);
        self.add_root(request, document, "repo", "repo", None, None);
        self.add_root(request, document, "org", "org", None, None);

        let payload = document.field("payload").cloned().unwrap_or(Value::Null);
        let Some(qualifier) = qualifier else { return };
        match kind.as_str() {
            "IssuesEvent" => self.issues_event(request, document, &payload, &qualifier),
            "IssueCommentEvent" => self.issue_comment_event(request, document, &payload, &qualifier),
            "PushEvent" => self.push_event(document, &payload, &qualifier),
            "PageBuildEvent" => self.page_build_event(request, document, &payload, &qualifier),
            _ => {}
        }
    }

    fn issues_event(
        &self,
        request: &mut Request,
        document: &mut Document,
        payload: &Value,
        qualifier: &Urn,
    ) {
        let Some(issue) = payload.get("issue") else { return };
        if let Some(id) = field_id(issue, "id") {
            document.add_link("issue", Link::one(LinkKind::Resource, qualifier.child("issue", id)));
        }
        if let Some(url) = issue.get("url").and_then(Value::as_str) {
            request.queue_child("issue", url, Some(qualifier.clone()));
        }
    }

    fn issue_comment_event(
        &self,
        request: &mut Request,
        document: &mut Document,
        payload: &Value,
        qualifier: &Urn,
    ) {
        if let Some(comment) = payload.get("comment") {
            if let Some(id) = field_id(comment, "id") {
                document.add_link(
                    "comment",
                    Link::one(LinkKind::Resource, qualifier.child("issue_comment", id)),
                );
            }
            if let Some(url) = comment.get("url").and_then(Value::as_str) {
                request.queue_child("issue_comment", url, Some(qualifier.clone()));
            }
        }
        if let Some(issue) = payload.get("issue") {
            if let Some(id) = field_id(issue, "id") {
                document.add_link("issue", Link::one(LinkKind::Resource, qualifier.child("issue", id)));
            }
        }
    }

    fn push_event(&self, document: &mut Document, payload: &Value, qualifier: &Urn) {
        let shas: Vec<Urn> = payload
            .get("commits")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|commit| field_id(commit, "sha"))
            .map(|sha| qualifier.child("commit", sha))
            .collect();
        if !shas.is_empty() {
            document.add_link("commits", Link::many(LinkKind::Resource, shas));
        }
    }

    fn page_build_event(
        &self,
        request: &mut Request,
        document: &mut Document,
        payload: &Value,
        qualifier: &Urn,
    ) {
        if let Some(id) = field_id(payload, "id") {
            document.add_link(
                "page_build",
                Link::one(LinkKind::Resource, qualifier.child("page_build", id)),
            );
        }
        // The build URL has shipped under payload.build.url and is
        // sometimes absent entirely.
        if let Some(url) = payload
            .get("build")
            .and_then(|build| build.get("url"))
            .and_then(Value::as_str)
        {
            request.queue_child("page_build", url, Some(qualifier.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::{LinkTarget, Metadata};

    fn event_document(content: serde_json::Value) -> Document {
        let metadata = Metadata::new(
            "IssuesEvent",
            "https://api.example.com/events/100",
            "2024-01-01T00:00:00Z".to_owned(),
        );
        Document::new(content, metadata)
    }

    #[test]
    fn issues_event_links_and_queues() {
        let processor = Processor::new();
        let mut request = Request::new("IssuesEvent", "https://api.example.com/events/100");
        let mut document = event_document(json!({
            "id": 100,
            "actor": {"id": 9, "url": "https://api.example.com/users/nine"},
            "repo": {"id": 42, "url": "https://api.example.com/repos/acme/widget"},
            "payload": {
                "issue": {"id": 7, "url": "https://api.example.com/repos/acme/widget/issues/7"}
            }
        }));

        processor.event(&mut request, &mut document);

        assert_eq!(
            document.link("self").unwrap().href,
            LinkTarget::One(Urn::from("urn:repo:42:IssuesEvent:100"))
        );
        assert_eq!(
            document.link("issue").unwrap().href,
            LinkTarget::One(Urn::from("urn:repo:42:issue:7"))
        );

        let kinds: Vec<&str> = request.enqueues.iter().map(|(e, _)| e.kind.as_str()).collect();
        assert_eq!(kinds, ["user", "repo", "issue"]);
    }

    #[test]
    fn missing_payload_fields_are_noops() {
        let processor = Processor::new();
        let mut request = Request::new("PageBuildEvent", "https://api.example.com/events/101");
        let mut document = event_document(json!({
            "id": 101,
            "repo": {"id": 42, "url": "https://api.example.com/repos/acme/widget"},
            "payload": {"id": 5}
        }));

        processor.event(&mut request, &mut document);

        assert_eq!(
            document.link("page_build").unwrap().href,
            LinkTarget::One(Urn::from("urn:repo:42:page_build:5"))
        );
        // no payload.build.url: nothing queued beyond the repo root
        let kinds: Vec<&str> = request.enqueues.iter().map(|(e, _)| e.kind.as_str()).collect();
        assert_eq!(kinds, ["repo"]);
    }

    #[test]
    fn push_event_links_commit_shas() {
        let processor = Processor::new();
        let mut request = Request::new("PushEvent", "https://api.example.com/events/102");
        let mut document = event_document(json!({
            "id": 102,
            "repo": {"id": 42, "url": "https://api.example.com/repos/acme/widget"},
            "payload": {"commits": [{"sha": "abc"}, {"sha": "def"}]}
        }));

        processor.event(&mut request, &mut document);

        assert_eq!(
            document.link("commits").unwrap().href,
            LinkTarget::Many(vec![
                Urn::from("urn:repo:42:commit:abc"),
                Urn::from("urn:repo:42:commit:def"),
            ])
        );
    }

    #[test]
    fn unqualified_events_still_link_roots() {
        let processor = Processor::new();
        let mut request = Request::new("WatchEvent", "https://api.example.com/events/103");
        let mut document = event_document(json!({
            "id": 103,
            "actor": {"id": 9, "url": "https://api.example.com/users/nine"},
        }));

        processor.event(&mut request, &mut document);

        assert!(document.link("self").is_none());
        assert_eq!(
            document.link("actor").unwrap().href,
            LinkTarget::One(Urn::root("user", 9))
        );
    }
}
