//! Collection pagination: URL page parameters and RFC 5988 headers.

use crate::context::{Outcome, Queuable, Request};
use crate::document::{Document, Link, LinkKind, Urn};
use crate::process::Processor;
use crate::queue::QueueName;

/// Extracts the `page` query parameter from a URL.
pub(crate) fn page_param(url: &str) -> Option<u32> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

/// Returns `url` with its `page` parameter set to `page`, appending the
/// parameter when absent.
pub(crate) fn with_page(url: &str, page: u32) -> String {
    match url.split_once('?') {
        Some((base, query)) => {
            let mut replaced = false;
            let params: Vec<String> = query
                .split('&')
                .map(|pair| {
                    if pair.split_once('=').is_some_and(|(key, _)| key == "page") {
                        replaced = true;
                        format!("page={page}")
                    } else {
                        pair.to_owned()
                    }
                })
                .collect();
            let params = params.join("&");
            if replaced {
                format!("{base}?{params}")
            } else {
                format!("{base}?{params}&page={page}")
            }
        }
        None => format!("{url}?page={page}"),
    }
}

/// Extracts the target URL of the given `rel` from an RFC 5988 `Link`
/// header.
pub(crate) fn rel_link(header: &str, rel: &str) -> Option<String> {
    let needle = format!("rel=\"{rel}\"");
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.split(';').any(|param| param.trim() == needle) {
            return None;
        }
        let target = target.trim();
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_owned())
    })
}

impl Processor {
    /// Handles a collection response: pages 2 through last are enqueued
    /// onto the `soon` queue, and the current response is processed as
    /// page 1.
    pub(super) fn collection(&self, request: &mut Request, document: &mut Document) {
        let header = request
            .response
            .as_ref()
            .and_then(|response| response.link_header.clone());

        if let Some(header) = header {
            if let Some(last_url) = rel_link(&header, "last") {
                if let Some(last) = page_param(&last_url) {
                    let kind = request.kind().unwrap_or("collection").to_owned();
                    for page in 2..=last {
                        let url = with_page(&last_url, page);
                        let mut entry =
                            Queuable::with_policy(kind.clone(), url, request.policy.clone());
                        entry.context = request.context.clone();
                        request.track(entry, QueueName::Soon);
                    }
                }
            }
        }

        self.page(1, request, document);
    }

    /// Handles one page of a collection.
    ///
    /// Sets the page's `self` link, applies relation processing when a
    /// relation descriptor is carried, and enqueues every element.
    pub(super) fn page(&self, number: u32, request: &mut Request, document: &mut Document) {
        let Some(element_kind) = request.collection_element_kind().map(str::to_owned) else {
            request.mark_skip(Outcome::Skipped, "No handler");
            return;
        };
        let qualifier = request.qualifier().cloned();

        let self_urn = match &qualifier {
            Some(qualifier) => qualifier.page(&element_kind, number),
            None => Urn::from(format!("urn:{element_kind}:page:{number}")),
        };
        document.add_link("self", Link::one(LinkKind::SelfLink, self_urn));

        if request.context.relation.is_some() {
            self.process_relation(request, document);
        }

        let urls: Vec<String> = document
            .elements()
            .into_iter()
            .flatten()
            .filter_map(|element| element.get("url"))
            .filter_map(|url| url.as_str())
            .map(str::to_owned)
            .collect();
        for url in urls {
            request.queue_collection_element(&element_kind, &url, qualifier.clone());
        }
    }
}
