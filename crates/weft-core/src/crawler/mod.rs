//! Per-request pipeline orchestration.
//!
//! One cycle runs the ordered stages below, each a total function over
//! the request. Stages capture their own failures into the request's
//! disposition instead of propagating, so a cycle never aborts the
//! worker loop that runs it.
//!
//! 1. pop a request (or synthesize an internal one) and stamp ownership
//! 2. acquire the per-URL lease
//! 3. filter malformed and disallowed requests
//! 4. fetch
//! 5. convert the payload into a document
//! 6. process the document (links + discovered work)
//! 7. store the document
//! 8. complete: join side effects, release the lease, settle the broker
//! 9. log the outcome
//!
//! Ordering matters under partial failure: the store write
//! happens-before the broker ack, discovered work is joined before the
//! ack, and the lease is always released before ack or abandon.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ConfigHandle;
use crate::context::{MAX_ATTEMPTS, Outcome, Queuable, Request};
use crate::document::{Document, Headers, Metadata};
use crate::fetch::Fetcher;
use crate::lock::LockService;
use crate::process::Processor;
use crate::queue::{QueueName, QueueSet};
use crate::store::Store;
use crate::{Result, TRACING_TARGET_CRAWLER as TARGET};

/// Orchestrates one request lifecycle per call.
///
/// Stateless with respect to requests: all per-request mutation lives on
/// the [`Request`] value threaded through the stages, so one `Crawler`
/// is shared by every worker loop.
pub struct Crawler {
    name: String,
    queues: QueueSet,
    store: Arc<dyn Store>,
    locks: Option<Arc<dyn LockService>>,
    fetcher: Arc<dyn Fetcher>,
    processor: Processor,
    config: ConfigHandle,
}

impl Crawler {
    /// Creates a [`Crawler`] over the given collaborators.
    ///
    /// Passing no lock service disables per-URL exclusion; single-worker
    /// deployments run fine without one.
    pub fn new(
        queues: QueueSet,
        store: Arc<dyn Store>,
        locks: Option<Arc<dyn LockService>>,
        fetcher: Arc<dyn Fetcher>,
        processor: Processor,
        config: ConfigHandle,
    ) -> Self {
        let name = config.current().name;
        Self {
            name,
            queues,
            store,
            locks,
            fetcher,
            processor,
            config,
        }
    }

    /// Returns the crawler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the queue set, for seeding and operator surfaces.
    #[must_use]
    pub const fn queues(&self) -> &QueueSet {
        &self.queues
    }

    /// Pushes seed work onto the named queue.
    pub async fn queue(&self, entries: Vec<Queuable>, name: QueueName) -> Result<()> {
        self.queues.push(entries, name).await
    }

    /// Runs one full request cycle on behalf of `loop_name`.
    ///
    /// Always returns the completed request; failures are recorded on it
    /// rather than raised.
    pub async fn run_cycle(&self, loop_name: &str) -> Request {
        let request = self.get_request(loop_name).await;
        let request = self.acquire_lock(request).await;
        let request = self.filter(request).await;
        let request = self.fetch(request).await;
        let request = self.convert_to_document(request);
        let request = self.process_document(request);
        let request = self.store_document(request).await;
        let request = self.complete_request(request).await;
        self.log_outcome(&request);
        request
    }

    async fn get_request(&self, loop_name: &str) -> Request {
        let polling = Duration::from_millis(self.config.current().polling_delay_ms);
        let mut request = match self.queues.pop().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                let mut blank = Request::blank();
                blank.mark_skip(Outcome::Skipped, "Exhausted queue");
                blank.next_request_time = Some(Instant::now() + polling);
                blank
            }
            Err(error) => {
                tracing::error!(target: TARGET, %error, "queue pop failed");
                let mut trap = Request::error_trap();
                trap.mark_skip(Outcome::Error, error.to_string());
                trap.next_request_time = Some(Instant::now() + polling);
                trap
            }
        };
        request.start = Some(jiff::Timestamp::now());
        request.loop_name = loop_name.to_owned();
        request
    }

    async fn acquire_lock(&self, mut request: Request) -> Request {
        if request.should_skip() {
            return request;
        }
        let Some(locks) = &self.locks else {
            return request;
        };
        let Some(url) = request.url().map(str::to_owned) else {
            return request;
        };

        let ttl = Duration::from_millis(self.config.current().processing_ttl_ms);
        match locks.lock(&url, ttl).await {
            Ok(lease) => request.lock = Some(lease),
            Err(error) if error.is_contention() => {
                request.mark_requeue(Outcome::Requeued, "Could not lock");
            }
            Err(error) => request.mark_requeue(Outcome::Error, error.to_string()),
        }
        request
    }

    async fn filter(&self, mut request: Request) -> Request {
        if request.should_skip() {
            return request;
        }

        let kind_missing = request.kind().is_none_or(str::is_empty);
        let url_missing = request.url().is_none_or(str::is_empty);
        if kind_missing || url_missing {
            if let Some(entry) = request.queuable() {
                if let Err(error) = self.queues.push_dead(entry).await {
                    tracing::error!(target: TARGET, %error, "dead-letter push failed");
                }
            }
            request.mark_skip(Outcome::Error, "Malformed request: missing type or url");
            return request;
        }

        let options = self.config.current();
        if !options.org_filter.is_empty()
            && matches!(request.kind(), Some("repo" | "repos" | "org"))
        {
            let allowed = request
                .url()
                .and_then(org_segment)
                .is_some_and(|org| options.org_filter.contains(&org.to_lowercase()));
            if !allowed {
                request.mark_skip(Outcome::Skipped, "Filtered");
            }
        }
        request
    }

    async fn fetch(&self, mut request: Request) -> Request {
        if request.should_skip() {
            return request;
        }
        if let Err(error) = self.fetcher.fetch(&mut request).await {
            request.mark_requeue(Outcome::Error, error.to_string());
        }
        request
    }

    fn convert_to_document(&self, mut request: Request) -> Request {
        if request.should_skip() {
            return request;
        }
        let Some(payload) = request.payload.take() else {
            return request;
        };

        let kind = request.fetch_kind().unwrap_or_default().to_owned();
        let url = request.url().unwrap_or_default().to_owned();
        let fetched_at = jiff::Timestamp::now().to_string();

        // A rehydrated response carries the stored metadata as a
        // template; fresh identity fields overlay it.
        let mut metadata = match request
            .response
            .as_ref()
            .and_then(|response| response.template.clone())
        {
            Some(template) => template,
            None => Metadata::new(kind.clone(), url.clone(), String::new()),
        };
        metadata.kind = kind;
        metadata.url = url;
        metadata.fetched_at = fetched_at;
        if let Some(response) = &request.response {
            if let Some(etag) = &response.etag {
                metadata.etag = Some(etag.clone());
            }
            if let Some(link) = &response.link_header {
                metadata.headers = Some(Headers {
                    link: Some(link.clone()),
                });
            }
        }

        request.document = Some(Document::new(payload, metadata));
        request
    }

    fn process_document(&self, mut request: Request) -> Request {
        if request.should_skip() || request.document.is_none() {
            return request;
        }

        let started = std::time::Instant::now();
        self.processor.process(&mut request);
        request
            .meta
            .set("process", started.elapsed().as_millis() as u64);

        // Flush discovered work in the background; completion joins the
        // handles before the broker ack.
        let work: Vec<(Queuable, QueueName)> = request.enqueues.drain(..).collect();
        for (entry, queue) in work {
            let queues = self.queues.clone();
            let handle = tokio::spawn(async move { queues.push(vec![entry], queue).await });
            request.promises.push(handle);
        }
        request
    }

    async fn store_document(&self, mut request: Request) -> Request {
        if request.should_skip() || !request.policy.should_save() {
            return request;
        }
        let Some(document) = request.document.as_ref() else {
            return request;
        };

        let started = std::time::Instant::now();
        match self.store.upsert(document).await {
            Ok(outcome) => {
                request
                    .meta
                    .set("store", started.elapsed().as_millis() as u64);
                request.meta.set("upsert", outcome.to_string());
            }
            Err(error) => request.mark_requeue(Outcome::Error, error.to_string()),
        }
        request
    }

    /// Settles the request against the lock service and the broker.
    ///
    /// Both paths release the lease before touching the broker. A failed
    /// release abandons the delivery so the broker redelivers after its
    /// own timeout; the lease simply expires.
    async fn complete_request(&self, mut request: Request) -> Request {
        if request.should_requeue() {
            return self.complete_requeue(request).await;
        }

        let promises = std::mem::take(&mut request.promises);
        let mut failed = false;
        for handle in promises {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(target: TARGET, %error, "discovered work failed to enqueue");
                    failed = true;
                }
                Err(error) => {
                    tracing::warn!(target: TARGET, %error, "discovered work was cancelled");
                    failed = true;
                }
            }
        }
        if failed {
            request.mark_requeue(Outcome::Error, "Discovered work failed to enqueue");
            return self.complete_requeue(request).await;
        }

        match self.release_lock(&mut request).await {
            Ok(()) => {
                if let Err(error) = self.queues.done(&request).await {
                    tracing::error!(target: TARGET, %error, "ack failed");
                }
            }
            Err(error) => {
                tracing::warn!(target: TARGET, %error, "lease release failed; abandoning delivery");
                if let Err(error) = self.queues.abandon(&request).await {
                    tracing::error!(target: TARGET, %error, "abandon failed");
                }
            }
        }

        request.mark_processed();
        request
    }

    async fn complete_requeue(&self, mut request: Request) -> Request {
        match self.requeue(&mut request).await {
            Ok(()) => match self.release_lock(&mut request).await {
                Ok(()) => {
                    if let Err(error) = self.queues.done(&request).await {
                        tracing::error!(target: TARGET, %error, "ack failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(target: TARGET, %error, "lease release failed; abandoning delivery");
                    if let Err(error) = self.queues.abandon(&request).await {
                        tracing::error!(target: TARGET, %error, "abandon failed");
                    }
                }
            },
            Err(error) => {
                // The entry stays with the broker for broker-level retry.
                tracing::error!(target: TARGET, %error, "requeue failed; abandoning delivery");
                if let Err(error) = self.release_lock(&mut request).await {
                    tracing::warn!(target: TARGET, %error, "lease release failed");
                }
                if let Err(error) = self.queues.abandon(&request).await {
                    tracing::error!(target: TARGET, %error, "abandon failed");
                }
            }
        }
        request
    }

    async fn requeue(&self, request: &mut Request) -> Result<()> {
        request.attempt_count += 1;
        request.meta.set("attempt", request.attempt_count);

        let Some(entry) = request.queuable() else {
            return Ok(());
        };
        if request.attempt_count > MAX_ATTEMPTS {
            self.queues.push_dead(entry).await
        } else {
            self.queues.repush(request.delivery.as_ref(), entry).await
        }
    }

    async fn release_lock(&self, request: &mut Request) -> Result<()> {
        let Some(lease) = request.lock.take() else {
            return Ok(());
        };
        let Some(locks) = &self.locks else {
            return Ok(());
        };
        locks.unlock(lease).await
    }

    fn log_outcome(&self, request: &Request) {
        let outcome = request.outcome().unwrap_or(Outcome::Processed);
        let subject = match (request.kind(), request.url()) {
            (Some(kind), Some(url)) => format!("{kind}@{url}"),
            _ => "internal".to_owned(),
        };
        let message = request.message().unwrap_or_default();

        if outcome == Outcome::Error {
            tracing::error!(
                target: TARGET,
                loop_name = %request.loop_name,
                %subject,
                %message,
                meta = %request.meta,
                "cycle failed"
            );
        } else {
            tracing::info!(
                target: TARGET,
                loop_name = %request.loop_name,
                outcome = %outcome,
                policy = %request.policy.short_form(),
                %subject,
                %message,
                meta = %request.meta,
                "cycle completed"
            );
        }
    }
}

impl fmt::Debug for Crawler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crawler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Extracts the org from path segment 2 of an API URL
/// (`/repos/<org>/<name>`, `/orgs/<org>`).
fn org_segment(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split('/').nth(2).filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use http::StatusCode;
    use serde_json::{Value, json};
    use tracing_test::traced_test;

    use super::*;
    use crate::config::Options;
    use crate::fetch::FetchResponse;
    use crate::lock::InMemLockService;
    use crate::store::InMemStore;

    const REPO_URL: &str = "https://api.example.com/repos/acme/widget";

    /// Fetcher that replays a script, one step per call. Panics when
    /// called with an empty script, which doubles as an assertion that
    /// skipped requests never reach the fetcher.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Step>>,
    }

    enum Step {
        Payload {
            payload: Value,
            etag: Option<&'static str>,
            link: Option<&'static str>,
        },
        Unmodified,
        EmptyRepo,
        Fail(u16),
    }

    impl ScriptedFetcher {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &mut Request) -> Result<()> {
            let step = {
                let mut script = self.script.lock().unwrap();
                script.pop_front().expect("fetcher called beyond its script")
            };
            match step {
                Step::Payload { payload, etag, link } => {
                    let mut response = FetchResponse::new(StatusCode::OK);
                    response.etag = etag.map(str::to_owned);
                    response.link_header = link.map(str::to_owned);
                    request.meta.set("status", 200);
                    request.response = Some(response);
                    request.payload = Some(payload);
                    Ok(())
                }
                Step::Unmodified => {
                    request.meta.set("status", 304);
                    request.mark_skip(Outcome::Skipped, "Unmodified");
                    Ok(())
                }
                Step::EmptyRepo => {
                    request.meta.set("status", 409);
                    request.mark_skip(Outcome::Skipped, "Empty repo");
                    Ok(())
                }
                Step::Fail(status) => Err(crate::Error::new(
                    crate::ErrorKind::Fetch,
                    format!("fetch failed: {status}"),
                )),
            }
        }
    }

    struct Harness {
        crawler: Crawler,
        queues: QueueSet,
        store: InMemStore,
        locks: InMemLockService,
    }

    fn harness(steps: Vec<Step>) -> Harness {
        harness_with_options(steps, Options::default())
    }

    fn harness_with_options(steps: Vec<Step>, options: Options) -> Harness {
        let queues = QueueSet::in_memory("crawler");
        let store = InMemStore::new();
        let locks = InMemLockService::new();
        let crawler = Crawler::new(
            queues.clone(),
            Arc::new(store.clone()),
            Some(Arc::new(locks.clone())),
            ScriptedFetcher::new(steps),
            Processor::new(),
            ConfigHandle::new(options),
        );
        Harness {
            crawler,
            queues,
            store,
            locks,
        }
    }

    fn repo_payload() -> Value {
        json!({
            "id": 42,
            "owner": {"id": 9, "url": "https://api.example.com/users/nine"},
            "teams_url": "https://api.example.com/repos/acme/widget/teams",
            "issues_url": "https://api.example.com/repos/acme/widget/issues{/number}",
        })
    }

    #[tokio::test]
    #[traced_test]
    async fn happy_path_processes_stores_and_acks() {
        let h = harness(vec![Step::Payload {
            payload: repo_payload(),
            etag: Some("\"abc\""),
            link: None,
        }]);
        h.queues
            .push(vec![Queuable::new("repo", REPO_URL)], QueueName::Normal)
            .await
            .unwrap();

        let request = h.crawler.run_cycle("crawler-1").await;

        assert_eq!(request.outcome(), Some(Outcome::Processed));
        assert_eq!(request.attempt_count, 0);
        assert!(request.meta.get("store").is_some());
        assert!(request.lock.is_none());

        let stored = h.store.get("repo", REPO_URL).await.unwrap().unwrap();
        assert_eq!(stored.metadata.etag.as_deref(), Some("\"abc\""));
        assert_eq!(stored.metadata.version, Processor::new().version());

        // owner root, teams relation, issues collection
        assert_eq!(h.queues.depth(QueueName::Normal), 3);

        // the delivery settled and the lease was released
        let relocked = h
            .locks
            .lock(REPO_URL, Duration::from_secs(1))
            .await;
        assert!(relocked.is_ok());

        assert!(logs_contain("cycle completed"));
    }

    #[tokio::test]
    async fn unmodified_skips_without_storing() {
        let h = harness(vec![Step::Unmodified]);
        h.queues
            .push(vec![Queuable::new("repo", REPO_URL)], QueueName::Normal)
            .await
            .unwrap();

        let request = h.crawler.run_cycle("crawler-1").await;

        assert_eq!(request.outcome(), Some(Outcome::Skipped));
        assert_eq!(request.message(), Some("Unmodified"));
        assert!(h.store.get("repo", REPO_URL).await.unwrap().is_none());
        assert_eq!(h.queues.depth(QueueName::Normal), 0);
        assert_eq!(h.queues.depth(QueueName::Dead), 0);
    }

    #[tokio::test]
    async fn empty_repositories_skip_without_storing() {
        let h = harness(vec![Step::EmptyRepo]);
        h.queues
            .push(vec![Queuable::new("repo", REPO_URL)], QueueName::Normal)
            .await
            .unwrap();

        let request = h.crawler.run_cycle("crawler-1").await;

        assert_eq!(request.outcome(), Some(Outcome::Skipped));
        assert_eq!(request.message(), Some("Empty repo"));
        assert!(h.store.get("repo", REPO_URL).await.unwrap().is_none());
        assert_eq!(h.queues.depth(QueueName::Dead), 0);
    }

    #[tokio::test]
    async fn lock_contention_requeues_without_fetching() {
        // An empty script makes any fetch attempt panic.
        let h = harness(vec![]);
        let held = h.locks.lock(REPO_URL, Duration::from_secs(60)).await.unwrap();
        h.queues
            .push(vec![Queuable::new("repo", REPO_URL)], QueueName::Normal)
            .await
            .unwrap();

        let request = h.crawler.run_cycle("crawler-1").await;

        assert_eq!(request.outcome(), Some(Outcome::Requeued));
        assert_eq!(request.message(), Some("Could not lock"));
        assert!(request.lock.is_none());

        // the bumped entry is back on its origin queue
        let redelivered = h.queues.pop().await.unwrap().unwrap();
        assert_eq!(redelivered.attempt_count, 1);
        assert_eq!(redelivered.url(), Some(REPO_URL));

        h.locks.unlock(held).await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_queue_synthesizes_a_polling_blank() {
        let h = harness(vec![]);

        let request = h.crawler.run_cycle("crawler-1").await;

        assert!(request.is_internal());
        assert_eq!(request.outcome(), Some(Outcome::Skipped));
        assert_eq!(request.message(), Some("Exhausted queue"));
        let wait = request
            .next_request_time
            .unwrap()
            .saturating_duration_since(Instant::now());
        assert!(wait <= Duration::from_millis(2_000));
        assert!(wait >= Duration::from_millis(1_900));
    }

    #[tokio::test]
    async fn transient_failures_exhaust_into_the_dead_queue() {
        let h = harness(vec![
            Step::Fail(500),
            Step::Fail(500),
            Step::Fail(500),
            Step::Fail(500),
            Step::Fail(500),
            Step::Fail(500),
        ]);
        h.queues
            .push(vec![Queuable::new("repo", REPO_URL)], QueueName::Normal)
            .await
            .unwrap();

        for attempt in 1..=MAX_ATTEMPTS {
            let request = h.crawler.run_cycle("crawler-1").await;
            assert_eq!(request.outcome(), Some(Outcome::Error));
            assert_eq!(request.attempt_count, attempt);
            assert_eq!(h.queues.depth(QueueName::Normal), 1);
        }

        // the sixth failure dead-letters instead of repushing
        let request = h.crawler.run_cycle("crawler-1").await;
        assert_eq!(request.attempt_count, MAX_ATTEMPTS + 1);
        assert_eq!(h.queues.depth(QueueName::Normal), 0);
        assert_eq!(h.queues.depth(QueueName::Dead), 1);
    }

    #[tokio::test]
    async fn collection_pages_fan_out_onto_soon() {
        let h = harness(vec![Step::Payload {
            payload: json!([
                {"id": 1, "url": "https://api.example.com/repos/acme/widget/issues/1"},
                {"id": 2, "url": "https://api.example.com/repos/acme/widget/issues/2"},
            ]),
            etag: None,
            link: Some(
                "<https://api.example.com/repos/acme/widget/issues?page=2>; rel=\"next\", \
                 <https://api.example.com/repos/acme/widget/issues?page=7>; rel=\"last\"",
            ),
        }]);
        let mut entry = Queuable::new("issues", "https://api.example.com/repos/acme/widget/issues");
        entry.context.qualifier = Some(crate::document::Urn::root("repo", 42));
        h.queues.push(vec![entry], QueueName::Normal).await.unwrap();

        let request = h.crawler.run_cycle("crawler-1").await;

        assert_eq!(request.outcome(), Some(Outcome::Processed));
        assert_eq!(h.queues.depth(QueueName::Soon), 6);
        assert_eq!(h.queues.depth(QueueName::Normal), 2);

        // pages store under the page fetch kind
        let stored = h
            .store
            .get("page", "https://api.example.com/repos/acme/widget/issues")
            .await
            .unwrap();
        assert!(stored.is_some());

        let page = h.queues.pop().await.unwrap().unwrap();
        assert_eq!(page.delivery.as_ref().unwrap().queue, QueueName::Soon);
        assert_eq!(page.policy, request.policy);
    }

    #[tokio::test]
    async fn malformed_entries_dead_letter_and_ack() {
        let h = harness(vec![]);
        h.queues
            .push(vec![Queuable::new("repo", "")], QueueName::Normal)
            .await
            .unwrap();

        let request = h.crawler.run_cycle("crawler-1").await;

        assert_eq!(request.outcome(), Some(Outcome::Error));
        assert!(!request.should_requeue());
        assert_eq!(h.queues.depth(QueueName::Dead), 1);
        assert_eq!(h.queues.depth(QueueName::Normal), 0);
    }

    #[tokio::test]
    async fn org_filter_skips_disallowed_orgs() {
        let mut options = Options::default();
        options.org_filter = ["acme".to_owned()].into();
        let h = harness_with_options(
            vec![Step::Payload {
                payload: repo_payload(),
                etag: None,
                link: None,
            }],
            options,
        );
        h.queues
            .push(
                vec![
                    Queuable::new("repo", "https://api.example.com/repos/globex/thing"),
                    Queuable::new("repo", REPO_URL),
                ],
                QueueName::Normal,
            )
            .await
            .unwrap();

        let filtered = h.crawler.run_cycle("crawler-1").await;
        assert_eq!(filtered.outcome(), Some(Outcome::Skipped));
        assert_eq!(filtered.message(), Some("Filtered"));

        let allowed = h.crawler.run_cycle("crawler-1").await;
        assert_eq!(allowed.outcome(), Some(Outcome::Processed));
    }

    #[test]
    fn org_segment_reads_the_path() {
        assert_eq!(org_segment(REPO_URL), Some("acme"));
        assert_eq!(org_segment("https://api.example.com/orgs/acme"), Some("acme"));
        assert_eq!(org_segment("https://api.example.com/user"), None);
    }
}
