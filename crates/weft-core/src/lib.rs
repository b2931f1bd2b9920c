#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod context;
pub mod crawler;
pub mod daemon;
pub mod document;
mod error;
pub mod fetch;
pub mod lock;
pub mod process;
pub mod queue;
pub mod store;

#[doc(hidden)]
pub mod prelude;

#[doc(no_inline)]
pub use async_trait::async_trait;

pub use crate::error::{BoxError, Error, ErrorKind};

/// Specialized [`Result`] type for request processing.
///
/// [`Result`]: std::result::Result
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Tracing target for pipeline events.
pub(crate) const TRACING_TARGET_CRAWLER: &str = "weft_core::crawler";

/// Tracing target for loop and supervisor events.
pub(crate) const TRACING_TARGET_DAEMON: &str = "weft_core::daemon";
