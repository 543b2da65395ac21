use std::time::Duration;
use thiserror::Error;

use crate::oauth1::OAuth1Error;

/// Why a URI was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// Not parseable as a URI
    ParseError,
    /// No host
    MissingAuthority,
    /// No scheme
    MissingScheme,
    /// Carries a `#fragment`
    Fragment,
    /// Relative target with nothing to resolve it against
    Relative,
}

/// Errors of the client, its stages and the response readers
///
/// A response with a 4xx or 5xx status is a successful exchange. Only
/// [`Response::error_for_status`](crate::Response::error_for_status) and the
/// checked readers turn it into [`HttpError::HttpStatus`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("cannot build HTTP request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("bad header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("bad HTTP method: {0}")]
    InvalidMethod(#[from] http::method::InvalidMethod),

    #[error("URI '{url}' rejected: {reason}")]
    InvalidUri {
        url: String,
        /// Match on this; `reason` is for humans
        kind: InvalidUriKind,
        reason: String,
    },

    #[error("scheme '{scheme}' rejected: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// No response headers within the configured timeout
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The request's cancellation token fired
    #[error("request cancelled")]
    Cancelled,

    /// Connect, I/O or proxy failure
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Handshake or certificate failure
    #[error("TLS failure: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The worker pool stopped while the request was pending
    #[error("worker pool shut down")]
    ServiceClosed,

    #[error("response body exceeds {limit} bytes (read {actual})")]
    BodyTooLarge { limit: usize, actual: usize },

    /// A streamed body was already consumed and `buffer_request` is off
    #[error("request body was already consumed and cannot be replayed")]
    BodyNotReplayable,

    #[error("status {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        /// Start of the body, truncated to
        /// [`ERROR_BODY_PREVIEW_LIMIT`](crate::ERROR_BODY_PREVIEW_LIMIT)
        body_preview: String,
        content_type: Option<String>,
    },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form encoding: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    OAuth1(#[from] OAuth1Error),
}

impl HttpError {
    /// Whether the exchange itself failed (no HTTP response was produced)
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HttpError::Transport(_) | HttpError::Tls(_) | HttpError::Timeout(_) | HttpError::Cancelled
        )
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        let tls = has_tls_cause(&err);
        let boxed = Box::new(err);
        if tls { Self::Tls(boxed) } else { Self::Transport(boxed) }
    }
}

/// True if any error in the source chain is a rustls error.
///
/// `io::Error::source()` skips its payload, so payloads are checked directly.
pub(crate) fn has_tls_cause(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
        {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    /// Error with a single optional cause
    #[derive(Debug)]
    struct Layer {
        label: &'static str,
        cause: Option<Box<dyn Error + Send + Sync>>,
    }

    impl Layer {
        fn leaf(label: &'static str) -> Self {
            Self { label, cause: None }
        }

        fn over(label: &'static str, cause: impl Error + Send + Sync + 'static) -> Self {
            Self {
                label,
                cause: Some(Box::new(cause)),
            }
        }
    }

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label)
        }
    }

    impl Error for Layer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            self.cause.as_deref().map(|e| e as &(dyn Error + 'static))
        }
    }

    #[test]
    fn test_transport_source_is_kept() {
        let err = HttpError::Transport(Box::new(Layer::leaf("reset by peer")));
        assert_eq!(err.source().unwrap().to_string(), "reset by peer");
        assert_eq!(err.to_string(), "transport failure: reset by peer");
    }

    #[test]
    fn test_is_transport() {
        assert!(HttpError::Cancelled.is_transport());
        assert!(HttpError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(HttpError::Tls(Box::new(Layer::leaf("expired"))).is_transport());
        assert!(!HttpError::ServiceClosed.is_transport());
        assert!(!HttpError::Config("missing".into()).is_transport());
        assert!(!HttpError::BodyNotReplayable.is_transport());
    }

    #[test]
    fn test_rustls_error_behind_io_error_is_tls() {
        let io = std::io::Error::other(rustls::Error::General("handshake".into()));
        assert!(has_tls_cause(&Layer::over("connect", Layer::over("io", io))));
    }

    #[test]
    fn test_plain_io_error_is_not_tls() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(!has_tls_cause(&Layer::over("connect", io)));
        assert!(!has_tls_cause(&Layer::leaf("connect")));
    }

    #[test]
    fn test_oauth1_error_is_transparent() {
        let err = HttpError::from(OAuth1Error::Config("consumer key is empty".into()));
        assert_eq!(err.to_string(), "OAuth1 configuration error: consumer key is empty");
    }
}
