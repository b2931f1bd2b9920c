use std::convert::Infallible;
use std::{fmt, io};

/// Type alias for a type-erased [`Error`] type.
///
/// [`Error`]: std::error::Error
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error kind representing the category of error that occurred.
///
/// The kind decides how the crawler routes a failed request: contention
/// and transient collaborator failures requeue, while the remaining kinds
/// are surfaced through the dead-letter queue and error-level logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Queue broker errors (pop/push/ack failures, broken deliveries).
    Queue,

    /// Lease acquisition or release failures other than contention.
    Lock,

    /// Another worker holds the lease for the URL. Always retryable.
    Contention,

    /// Document store errors (upsert/etag/get failures).
    Store,

    /// Fetcher errors (network failures, unexpected statuses).
    Fetch,

    /// Document processing errors (malformed payloads, bad links).
    Process,

    /// Configuration errors (unparsable options or patches).
    Config,

    /// I/O errors (file system, network).
    Io,

    /// Other unclassified errors.
    Other,
}

impl ErrorKind {
    /// Returns a string representation of the error kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Lock => "lock",
            Self::Contention => "contention",
            Self::Store => "store",
            Self::Fetch => "fetch",
            Self::Process => "process",
            Self::Config => "config",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by a collaborator during request processing.
///
/// `Error` provides structured error information including:
/// - Error kind for categorization and retry routing
/// - Optional source error for error chains
///
/// # Examples
///
/// ```no_run
/// use weft_core::{Error, ErrorKind};
///
/// // From a message
/// let err = Error::new(ErrorKind::Store, "upsert failed");
///
/// // With a source error
/// let err = Error::with_source(
///     ErrorKind::Fetch,
///     "request failed",
///     Box::new(std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
/// );
///
/// assert!(!err.is_contention());
/// ```
#[must_use]
#[derive(thiserror::Error)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Creates a new [`Error`] with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new [`Error`] with the given kind, message, and source error.
    pub fn with_source(kind: ErrorKind, message: impl Into<String>, source: BoxError) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a new [`Error`] from a boxable error.
    pub fn from_boxed(error: impl Into<BoxError>) -> Self {
        let boxed = error.into();
        Self {
            kind: ErrorKind::Other,
            message: boxed.to_string(),
            source: Some(boxed),
        }
    }

    /// Returns the error kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if this error signals lease contention.
    ///
    /// Contention is the one lock failure the pipeline treats as routine:
    /// the request is requeued without counting against the error logs.
    #[inline]
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self.kind, ErrorKind::Contention)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Error");
        debug
            .field("kind", &self.kind)
            .field("message", &self.message);

        if let Some(ref source) = self.source {
            debug.field("source", source);
        }

        debug.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<BoxError> for Error {
    #[inline]
    fn from(value: BoxError) -> Self {
        Self::from_boxed(value)
    }
}

impl From<Infallible> for Error {
    #[inline]
    fn from(_: Infallible) -> Self {
        unreachable!()
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::with_source(ErrorKind::Io, "I/O error", Box::new(error))
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::with_source(ErrorKind::Other, "serialization error", Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_as_str() {
        assert_eq!(ErrorKind::Queue.as_str(), "queue");
        assert_eq!(ErrorKind::Contention.as_str(), "contention");
        assert_eq!(ErrorKind::Store.to_string(), "store");
    }

    #[test]
    fn display_includes_kind() {
        let err = Error::new(ErrorKind::Fetch, "connection reset");
        assert_eq!(err.to_string(), "[fetch] connection reset");
    }

    #[test]
    fn contention_detection() {
        assert!(Error::new(ErrorKind::Contention, "lease held").is_contention());
        assert!(!Error::new(ErrorKind::Lock, "release failed").is_contention());
    }

    #[test]
    fn source_chain_preserved() {
        let io_err = io::Error::from(io::ErrorKind::NotFound);
        let err = Error::with_source(ErrorKind::Store, "read failed", Box::new(io_err));
        assert!(std::error::Error::source(&err).is_some());
    }
}
