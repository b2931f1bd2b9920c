//! Fetcher seam: conditional resource retrieval.
//!
//! The engine consumes HTTP through the [`Fetcher`] trait. Transport
//! bindings live in sibling crates (`weft-reqwest` is the reference
//! binding); tests script their own implementations.

use http::StatusCode;

use crate::Result;
use crate::context::Request;
use crate::document::Metadata;

/// Response metadata attached to a request by the [`Fetcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// Remote status, or the synthetic status of a store resolution.
    pub status: StatusCode,

    /// ETag of the response, when the remote provided one.
    pub etag: Option<String>,

    /// Raw RFC 5988 `Link` header, present on paginated collections.
    pub link_header: Option<String>,

    /// Metadata of the stored document when the payload was rehydrated
    /// from the store instead of fetched anew. Overlaid onto the fresh
    /// metadata when the document is rebuilt.
    pub template: Option<Metadata>,
}

impl FetchResponse {
    /// Creates an empty response for the given status.
    #[must_use]
    pub const fn new(status: StatusCode) -> Self {
        Self {
            status,
            etag: None,
            link_header: None,
            template: None,
        }
    }

    /// Returns `true` if the remote actually returned a new payload,
    /// as opposed to a rehydrated or unmodified one.
    #[inline]
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.status.is_success()
    }
}

/// Resolves a request into a payload and [`FetchResponse`].
///
/// # Contract
///
/// Implementations must:
///
/// - look up the prior ETag for `(fetch kind, url)` through the store
///   and issue a conditional GET;
/// - on `200`, set the request's payload and response;
/// - on `304` with a matching ETag, either mark the request skipped as
///   `Unmodified`, or rehydrate the stored document (carrying its
///   metadata as [`FetchResponse::template`]) when the request is
///   forced;
/// - on `409`, mark the request skipped as an empty repository;
/// - on any other non-2xx status, return an error (the pipeline
///   requeues);
/// - record the `status` and `fetch` latency in the request meta.
///
/// Collection requests fetch under the `page` kind, preserving the
/// collection's element type on the request (see
/// [`Request::fetch_kind`]).
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Resolves the request in place.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures worth retrying; expected
    /// conditions (`304`, `409`) are marked on the request instead.
    async fn fetch(&self, request: &mut Request) -> Result<()>;
}
