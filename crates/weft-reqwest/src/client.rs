use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH, LINK, USER_AGENT};
use serde_json::Value;
use weft_core::context::{Outcome, Request};
use weft_core::fetch::{FetchResponse, Fetcher};
use weft_core::store::Store;
use weft_core::{Error, ErrorKind, Result};

const TARGET: &str = "weft_reqwest::client";

/// Conditional-request [`Fetcher`] over a [`reqwest::Client`].
///
/// Prior ETags are looked up through the document store and sent as
/// `If-None-Match`. A `304 Not Modified` either short-circuits the
/// pipeline (`Unmodified`) or rehydrates the stored document when the
/// request is forced; `409 Conflict` marks empty repositories; other
/// non-2xx statuses error and requeue.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
///
/// use weft_core::store::InMemStore;
/// use weft_reqwest::HttpFetcher;
///
/// let store = Arc::new(InMemStore::new());
/// let fetcher = HttpFetcher::new(store).with_token("api-token");
/// ```
pub struct HttpFetcher {
    client: reqwest::Client,
    store: Arc<dyn Store>,
    token: Option<String>,
    user_agent: String,
}

impl HttpFetcher {
    /// Creates a fetcher with a default [`reqwest::Client`].
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_client(reqwest::Client::new(), store)
    }

    /// Creates a fetcher over an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, store: Arc<dyn Store>) -> Self {
        Self {
            client,
            store,
            token: None,
            user_agent: "weft-crawler".to_owned(),
        }
    }

    /// Sets the bearer token sent with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Resolves the request from the store, carrying the stored
    /// metadata as a template for the rebuild.
    async fn resolve_from_store(
        &self,
        request: &mut Request,
        kind: &str,
        url: &str,
        etag: Option<String>,
    ) -> Result<()> {
        match self.store.get(kind, url).await? {
            Some(document) => {
                let mut response = FetchResponse::new(StatusCode::NOT_MODIFIED);
                response.etag = document.metadata.etag.clone().or(etag);
                response.template = Some(document.metadata.clone());
                request.response = Some(response);
                request.payload = Some(document.content);
                Ok(())
            }
            None => {
                request.mark_skip(Outcome::Skipped, "Unmodified");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("user_agent", &self.user_agent)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

#[weft_core::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &mut Request) -> Result<()> {
        let Some(url) = request.url().map(str::to_owned) else {
            return Err(Error::new(ErrorKind::Fetch, "request has no url"));
        };
        let kind = request
            .fetch_kind()
            .map(str::to_owned)
            .unwrap_or_default();
        let etag = self.store.etag(&kind, &url).await?;
        let force = request.context.force || request.policy.should_rehydrate();

        if !request.policy.should_fetch() {
            request.meta.set("status", StatusCode::NOT_MODIFIED.as_u16());
            return self.resolve_from_store(request, &kind, &url, etag).await;
        }

        let mut builder = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.user_agent);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(etag) = &etag {
            builder = builder.header(IF_NONE_MATCH, etag);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|error| {
            Error::with_source(
                ErrorKind::Fetch,
                format!("request failed for {url}"),
                Box::new(error),
            )
        })?;

        let status = response.status();
        request.meta.set("status", status.as_u16());
        request
            .meta
            .set("fetch", started.elapsed().as_millis() as u64);
        tracing::debug!(target: TARGET, %url, status = status.as_u16(), "fetched");

        match status {
            status if status.is_success() => {
                let mut fetched = FetchResponse::new(status);
                fetched.etag = header_value(&response, ETAG);
                fetched.link_header = header_value(&response, LINK);
                let payload: Value = response.json().await.map_err(|error| {
                    Error::with_source(
                        ErrorKind::Fetch,
                        format!("unreadable payload from {url}"),
                        Box::new(error),
                    )
                })?;
                request.response = Some(fetched);
                request.payload = Some(payload);
                Ok(())
            }
            StatusCode::NOT_MODIFIED => {
                if force {
                    self.resolve_from_store(request, &kind, &url, etag).await
                } else {
                    request.mark_skip(Outcome::Skipped, "Unmodified");
                    Ok(())
                }
            }
            StatusCode::CONFLICT => {
                request.mark_skip(Outcome::Skipped, "Empty repo");
                Ok(())
            }
            status => Err(Error::new(
                ErrorKind::Fetch,
                format!("fetch failed: {status} for {url}"),
            )),
        }
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
