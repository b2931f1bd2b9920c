//! The document processor: payload in, linked document plus discovered
//! work out.
//!
//! Processing is pure with respect to collaborators. Handlers mutate the
//! request's document (links, version) and record discovered work on the
//! request; the crawler flushes that work into the queues afterwards.
//!
//! Dispatch resolves, in order:
//!
//! 1. a `page=N` URL parameter - the page handler,
//! 2. a collection type tag - the collection handler,
//! 3. the handler named by the type tag, including `<Name>Event` tags.
//!
//! A request with no matching handler is skipped, not failed.

mod entities;
mod events;
mod links;
mod pagination;

use crate::context::{Outcome, Request};
use crate::document::Document;

/// Current processor version.
///
/// Bumped whenever handler output changes shape, so version-driven
/// policies re-process documents produced by older processors.
const VERSION: u32 = 3;

/// Transforms fetched documents into link-annotated documents and
/// discovered work.
///
/// Stateless with respect to requests; one instance is shared by every
/// worker loop.
#[derive(Debug, Clone)]
pub struct Processor {
    version: u32,
}

impl Processor {
    /// Creates a [`Processor`] at the current version.
    pub const fn new() -> Self {
        Self { version: VERSION }
    }

    /// Creates a [`Processor`] claiming the given version.
    pub const fn with_version(version: u32) -> Self {
        Self { version }
    }

    /// Returns the processor version stamped on produced documents.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Processes the request's document in place.
    ///
    /// The policy gate may veto processing entirely; otherwise the
    /// document is stamped with the processor version and dispatched to
    /// its handler.
    pub fn process(&self, request: &mut Request) {
        if !request
            .policy
            .should_process(request.response.as_ref(), self.version)
        {
            request.mark_skip(Outcome::Skipped, "Excluded");
            return;
        }

        let Some(mut document) = request.document.take() else {
            return;
        };
        document.metadata.version = self.version;
        self.dispatch(request, &mut document);
        request.document = Some(document);
    }

    fn dispatch(&self, request: &mut Request, document: &mut Document) {
        if let Some(page) = request.url().and_then(pagination::page_param) {
            self.page(page, request, document);
            return;
        }
        if request.collection_element_kind().is_some() {
            self.collection(request, document);
            return;
        }

        match request.kind() {
            Some("org") => self.org(request, document),
            Some("user") => self.user(request, document),
            Some("repo") => self.repo(request, document),
            Some("team") => self.team(request, document),
            Some("commit") => self.commit(request, document),
            Some("issue") => self.issue(request, document),
            Some("issue_comment") => self.issue_comment(request, document),
            Some(kind) if kind.ends_with("Event") => self.event(request, document),
            _ => request.mark_skip(Outcome::Skipped, "No handler"),
        }
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::context::{Freshness, Policy, Queuable};
    use crate::document::{Metadata, Urn};
    use crate::fetch::FetchResponse;
    use crate::queue::QueueName;

    fn request_with_document(kind: &str, url: &str, content: serde_json::Value) -> Request {
        let mut request = Request::new(kind, url);
        request.response = Some(FetchResponse::new(StatusCode::OK));
        let metadata = Metadata::new(kind, url, "2024-01-01T00:00:00Z".to_owned());
        request.document = Some(Document::new(content, metadata));
        request
    }

    #[test]
    fn stamps_the_processor_version() {
        let processor = Processor::with_version(7);
        let mut request = request_with_document(
            "user",
            "https://api.example.com/users/nine",
            json!({"id": 9}),
        );

        processor.process(&mut request);

        assert_eq!(request.document.as_ref().unwrap().metadata.version, 7);
    }

    #[test]
    fn policy_gate_vetoes_processing() {
        let processor = Processor::new();
        let mut request = request_with_document(
            "user",
            "https://api.example.com/users/nine",
            json!({"id": 9}),
        );
        request.policy = Policy {
            freshness: Freshness::Match,
            ..Policy::default()
        };
        request.response = Some(FetchResponse::new(StatusCode::NOT_MODIFIED));

        processor.process(&mut request);

        assert!(request.should_skip());
        assert_eq!(request.message(), Some("Excluded"));
    }

    #[test]
    fn unknown_types_skip_without_a_handler() {
        let processor = Processor::new();
        let mut request = request_with_document(
            "widget",
            "https://api.example.com/widgets/1",
            json!({"id": 1}),
        );

        processor.process(&mut request);

        assert!(request.should_skip());
        assert_eq!(request.message(), Some("No handler"));
    }

    #[test]
    fn page_parameter_wins_over_collection_dispatch() {
        let processor = Processor::new();
        let mut request = request_with_document(
            "issues",
            "https://api.example.com/repos/acme/widget/issues?page=3",
            json!([{"id": 1, "url": "https://api.example.com/issues/1"}]),
        );
        request.context.qualifier = Some(Urn::root("repo", 42));

        processor.process(&mut request);

        let document = request.document.as_ref().unwrap();
        let link = document.link("self").unwrap();
        assert_eq!(
            serde_json::to_value(&link.href).unwrap(),
            json!("urn:repo:42:issue:page:3")
        );
    }

    #[test]
    fn collection_enqueues_remaining_pages_onto_soon() {
        let processor = Processor::new();
        let mut request = request_with_document(
            "issues",
            "https://api.example.com/repos/acme/widget/issues",
            json!([{"id": 1, "url": "https://api.example.com/repos/acme/widget/issues/1"}]),
        );
        request.context.qualifier = Some(Urn::root("repo", 42));
        let mut response = FetchResponse::new(StatusCode::OK);
        response.link_header = Some(
            "<https://api.example.com/repos/acme/widget/issues?page=2>; rel=\"next\", \
             <https://api.example.com/repos/acme/widget/issues?page=7>; rel=\"last\""
                .to_owned(),
        );
        request.response = Some(response);

        processor.process(&mut request);

        let pages: Vec<&(Queuable, QueueName)> = request
            .enqueues
            .iter()
            .filter(|(_, queue)| *queue == QueueName::Soon)
            .collect();
        assert_eq!(pages.len(), 6);
        assert_eq!(pages[0].0.url, "https://api.example.com/repos/acme/widget/issues?page=2");
        assert_eq!(pages[5].0.url, "https://api.example.com/repos/acme/widget/issues?page=7");
        // derived pages carry the policy and qualifier forward
        assert!(pages.iter().all(|(entry, _)| {
            entry.policy == request.policy
                && entry.context.qualifier == Some(Urn::root("repo", 42))
        }));

        // page 1 itself was processed inline: its element was enqueued
        let elements: Vec<&(Queuable, QueueName)> = request
            .enqueues
            .iter()
            .filter(|(_, queue)| *queue == QueueName::Normal)
            .collect();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].0.kind, "issue");
    }

    #[test]
    fn processing_is_idempotent_on_identical_input() {
        let processor = Processor::new();
        let mut request = request_with_document(
            "repo",
            "https://api.example.com/repos/acme/widget",
            json!({
                "id": 42,
                "owner": {"id": 9, "url": "https://api.example.com/users/nine"},
            }),
        );

        processor.process(&mut request);
        let first = request.document.as_ref().unwrap().metadata.links.clone();

        request.enqueues.clear();
        processor.process(&mut request);
        let second = request.document.as_ref().unwrap().metadata.links.clone();

        assert_eq!(first, second);
    }
}
