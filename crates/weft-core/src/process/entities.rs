//! Handlers for the root and child resource types.

use crate::context::Request;
use crate::document::{Document, Link, LinkKind};
use crate::process::Processor;

impl Processor {
    pub(super) fn org(&self, request: &mut Request, document: &mut Document) {
        self.root_self_link(request, document);
        self.link_siblings(request, document, "orgs");
        self.add_collection(request, document, "repos", "repo", None);
        self.add_relation(request, document, "members", "user", None);
    }

    pub(super) fn user(&self, request: &mut Request, document: &mut Document) {
        self.root_self_link(request, document);
        self.link_siblings(request, document, "users");
        self.add_collection(request, document, "repos", "repo", None);
    }

    pub(super) fn repo(&self, request: &mut Request, document: &mut Document) {
        self.root_self_link(request, document);
        self.link_siblings(request, document, "repos");
        self.add_root(request, document, "owner", "user", None, None);
        self.add_relation(request, document, "teams", "team", None);
        self.add_relation(request, document, "collaborators", "user", None);
        self.add_collection(request, document, "commits", "commit", None);
        self.add_collection(request, document, "issues", "issue", None);
    }

    pub(super) fn team(&self, request: &mut Request, document: &mut Document) {
        self.root_self_link(request, document);
        self.link_siblings(request, document, "teams");
        self.add_root(request, document, "organization", "org", None, None);
        self.add_relation(request, document, "members", "user", None);
        self.add_relation(request, document, "repos", "repo", None);
    }

    pub(super) fn commit(&self, request: &mut Request, document: &mut Document) {
        self.qualified_self_link(request, document, "sha");
        self.link_siblings(request, document, "commits");
        self.add_root(request, document, "author", "user", None, None);
        self.add_root(request, document, "committer", "user", None, None);
        self.link_qualifier_resource(request, document, "repo");
    }

    pub(super) fn issue(&self, request: &mut Request, document: &mut Document) {
        self.qualified_self_link(request, document, "id");
        self.link_siblings(request, document, "issues");
        self.add_root(request, document, "user", "user", None, None);
        self.add_root(request, document, "assignee", "user", None, None);
        self.link_qualifier_resource(request, document, "repo");
        self.add_collection(request, document, "comments", "issue_comment", None);
    }

    pub(super) fn issue_comment(&self, request: &mut Request, document: &mut Document) {
        self.qualified_self_link(request, document, "id");
        self.link_siblings(request, document, "issue_comments");
        self.add_root(request, document, "user", "user", None, None);
    }

    /// Links the enclosing scope (the qualifier) as a named resource.
    /// Unqualified requests carry no scope to link.
    fn link_qualifier_resource(&self, request: &Request, document: &mut Document, name: &str) {
        if let Some(qualifier) = request.qualifier() {
            document.add_link(name, Link::one(LinkKind::Resource, qualifier.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::{LinkTarget, Metadata, Urn};
    use crate::queue::QueueName;

    fn document(kind: &str, url: &str, content: serde_json::Value) -> Document {
        let metadata = Metadata::new(kind, url, "2024-01-01T00:00:00Z".to_owned());
        Document::new(content, metadata)
    }

    fn link_target<'a>(document: &'a Document, name: &str) -> &'a LinkTarget {
        &document.link(name).unwrap().href
    }

    #[test]
    fn repo_links_and_discovered_work() {
        let processor = Processor::new();
        let mut request = Request::new("repo", "https://api.example.com/repos/acme/widget");
        let mut doc = document(
            "repo",
            "https://api.example.com/repos/acme/widget",
            json!({
                "id": 42,
                "owner": {"id": 9, "url": "https://api.example.com/users/nine"},
                "teams_url": "https://api.example.com/repos/acme/widget/teams",
                "collaborators_url": "https://api.example.com/repos/acme/widget/collaborators{/collaborator}",
                "commits_url": "https://api.example.com/repos/acme/widget/commits{/sha}",
                "issues_url": "https://api.example.com/repos/acme/widget/issues{/number}",
            }),
        );

        processor.repo(&mut request, &mut doc);

        assert_eq!(*link_target(&doc, "self"), LinkTarget::One(Urn::root("repo", 42)));
        assert_eq!(*link_target(&doc, "siblings"), LinkTarget::One(Urn::from("urn:repos")));
        assert_eq!(*link_target(&doc, "owner"), LinkTarget::One(Urn::root("user", 9)));
        assert_eq!(
            *link_target(&doc, "teams"),
            LinkTarget::One(Urn::from("urn:repo:42:teams:pages"))
        );
        assert_eq!(
            *link_target(&doc, "issues"),
            LinkTarget::One(Urn::from("urn:repo:42:issues"))
        );

        // owner root, two relations, two collections
        assert_eq!(request.enqueues.len(), 5);
        let kinds: Vec<&str> = request.enqueues.iter().map(|(e, _)| e.kind.as_str()).collect();
        assert_eq!(kinds, ["user", "teams", "collaborators", "commits", "issues"]);
        assert!(request.enqueues.iter().all(|(_, q)| *q == QueueName::Normal));

        // child collections nest under the repo; the owner does not
        let (commits, _) = &request.enqueues[3];
        assert_eq!(commits.context.qualifier, Some(Urn::root("repo", 42)));
        let (owner, _) = &request.enqueues[0];
        assert!(owner.context.qualifier.is_none());
    }

    #[test]
    fn issue_nests_under_its_repo() {
        let processor = Processor::new();
        let mut request = Request::new("issue", "https://api.example.com/repos/acme/widget/issues/7");
        request.context.qualifier = Some(Urn::root("repo", 42));
        let mut doc = document(
            "issue",
            "https://api.example.com/repos/acme/widget/issues/7",
            json!({
                "id": 7,
                "user": {"id": 9, "url": "https://api.example.com/users/nine"},
                "comments_url": "https://api.example.com/repos/acme/widget/issues/7/comments",
            }),
        );

        processor.issue(&mut request, &mut doc);

        assert_eq!(
            *link_target(&doc, "self"),
            LinkTarget::One(Urn::from("urn:repo:42:issue:7"))
        );
        assert_eq!(
            *link_target(&doc, "siblings"),
            LinkTarget::One(Urn::from("urn:repo:42:issues"))
        );
        assert_eq!(*link_target(&doc, "repo"), LinkTarget::One(Urn::root("repo", 42)));
        // no assignee in the payload: no link, no enqueue for it
        assert!(doc.link("assignee").is_none());

        let kinds: Vec<&str> = request.enqueues.iter().map(|(e, _)| e.kind.as_str()).collect();
        assert_eq!(kinds, ["user", "comments"]);
    }

    #[test]
    fn commit_self_link_uses_the_sha() {
        let processor = Processor::new();
        let mut request = Request::new("commit", "https://api.example.com/repos/acme/widget/commits/abc");
        request.context.qualifier = Some(Urn::root("repo", 42));
        let mut doc = document(
            "commit",
            "https://api.example.com/repos/acme/widget/commits/abc",
            json!({
                "sha": "abc",
                "author": {"id": 9, "url": "https://api.example.com/users/nine"},
            }),
        );

        processor.commit(&mut request, &mut doc);

        assert_eq!(
            *link_target(&doc, "self"),
            LinkTarget::One(Urn::from("urn:repo:42:commit:abc"))
        );
        assert!(doc.link("committer").is_none());
    }

    #[test]
    fn org_queues_repos_and_members() {
        let processor = Processor::new();
        let mut request = Request::new("org", "https://api.example.com/orgs/acme");
        let mut doc = document(
            "org",
            "https://api.example.com/orgs/acme",
            json!({
                "id": 4,
                "repos_url": "https://api.example.com/orgs/acme/repos",
                "members_url": "https://api.example.com/orgs/acme/members{/member}",
            }),
        );

        processor.org(&mut request, &mut doc);

        let (repos, _) = &request.enqueues[0];
        // repos are roots: no qualifier on the collection
        assert!(repos.context.qualifier.is_none());
        let (members, _) = &request.enqueues[1];
        assert_eq!(members.url, "https://api.example.com/orgs/acme/members");
        assert!(members.context.relation.is_some());
    }
}
