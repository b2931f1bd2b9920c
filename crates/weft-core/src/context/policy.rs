//! Traversal policy attached to every request.
//!
//! A [`Policy`] decides whether a request is fetched, processed, and
//! stored. Policies are attached when a request is created and carried
//! across requeues and into derived pagination requests.

use serde::{Deserialize, Serialize};

use crate::fetch::FetchResponse;

/// How the fetcher resolves a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchBehavior {
    /// Conditional GET against the remote, honoring stored ETags.
    #[default]
    Default,

    /// Unconditional processing: a matching ETag rehydrates the stored
    /// document instead of skipping the request.
    Force,

    /// Never touch the remote; resolve entirely from the store.
    Storage,
}

/// When a fetched document is worth re-processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Process every document that reaches the processor.
    #[default]
    Always,

    /// Process fresh fetches, and rehydrated documents whose stored
    /// processor version lags the current one.
    Version,

    /// Process only documents the remote actually returned anew.
    Match,
}

/// Traversal policy: the fetch/process/store gates for one request.
///
/// # Examples
///
/// ```
/// use weft_core::context::Policy;
///
/// let policy = Policy::default();
/// assert!(policy.should_fetch());
/// assert!(policy.should_save());
/// assert_eq!(policy.short_form(), "A");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Policy name, carried for diagnostics.
    pub name: String,

    /// Fetch gate.
    pub fetch: FetchBehavior,

    /// Process gate.
    pub freshness: Freshness,

    /// Store gate.
    pub save: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            fetch: FetchBehavior::Default,
            freshness: Freshness::Always,
            save: true,
        }
    }
}

impl Policy {
    /// Creates a named policy with default gates.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if the remote should be contacted at all.
    #[must_use]
    pub const fn should_fetch(&self) -> bool {
        !matches!(self.fetch, FetchBehavior::Storage)
    }

    /// Returns `true` if a matching ETag should rehydrate the stored
    /// document rather than skip the request.
    #[must_use]
    pub const fn should_rehydrate(&self) -> bool {
        matches!(self.fetch, FetchBehavior::Force | FetchBehavior::Storage)
    }

    /// Returns `true` if the document should be processed under the
    /// given processor version.
    ///
    /// A fresh fetch always qualifies. Rehydrated documents qualify when
    /// the policy is version-driven and the stored version lags.
    #[must_use]
    pub fn should_process(&self, response: Option<&FetchResponse>, version: u32) -> bool {
        let fresh = response.is_some_and(FetchResponse::is_fresh);
        match self.freshness {
            Freshness::Always => true,
            Freshness::Match => fresh,
            Freshness::Version => {
                let stored = response
                    .and_then(|response| response.template.as_ref())
                    .map(|template| template.version);
                fresh || stored.is_none_or(|stored| stored < version)
            }
        }
    }

    /// Returns `true` if the processed document should be persisted.
    #[must_use]
    pub const fn should_save(&self) -> bool {
        self.save
    }

    /// Renders the policy as a short diagnostic tag.
    ///
    /// One letter per non-default axis: freshness (`A`/`V`/`M`), then
    /// `F` (force) or `S` (storage), then `N` when saving is off.
    #[must_use]
    pub fn short_form(&self) -> String {
        let mut form = String::with_capacity(3);
        form.push(match self.freshness {
            Freshness::Always => 'A',
            Freshness::Version => 'V',
            Freshness::Match => 'M',
        });
        match self.fetch {
            FetchBehavior::Default => {}
            FetchBehavior::Force => form.push('F'),
            FetchBehavior::Storage => form.push('S'),
        }
        if !self.save {
            form.push('N');
        }
        form
    }
}
