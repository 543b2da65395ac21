use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;

use crate::config::DEFAULT_MAX_BODY_SIZE;
use crate::error::HttpError;

/// Maximum number of body bytes kept in an `HttpStatus` error preview (8 KiB)
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Boxed response body, raw or decompressed
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

pin_project! {
    /// Response body that fails with [`HttpError::BodyTooLarge`] once more
    /// than `limit` data bytes have passed through it.
    ///
    /// Returned by [`Response::into_limited_body`]; the buffered readers on
    /// [`Response`] collect through it too.
    pub struct LimitedBody {
        #[pin]
        inner: ResponseBody,
        limit: usize,
        read: usize,
    }
}

impl LimitedBody {
    #[must_use]
    pub fn new(inner: ResponseBody, limit: usize) -> Self {
        Self {
            inner,
            limit,
            read: 0,
        }
    }

    /// Data bytes yielded so far
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.read
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Read the rest of the body into memory.
    ///
    /// A declared length above the limit fails before anything is read.
    async fn into_bytes(self) -> Result<Bytes, HttpError> {
        if let Some(declared) = self.inner.size_hint().exact()
            && !usize::try_from(declared).is_ok_and(|len| len <= self.limit)
        {
            return Err(HttpError::BodyTooLarge {
                limit: self.limit,
                actual: usize::try_from(declared).unwrap_or(usize::MAX),
            });
        }
        Ok(self.collect().await?.to_bytes())
    }
}

impl Body for LimitedBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, HttpError>>> {
        let this = self.project();
        let Some(frame) = ready!(this.inner.poll_frame(cx)) else {
            return Poll::Ready(None);
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return Poll::Ready(Some(Err(HttpError::Transport(e)))),
        };

        *this.read += frame.data_ref().map_or(0, Bytes::len);
        if *this.read > *this.limit {
            return Poll::Ready(Some(Err(HttpError::BodyTooLarge {
                limit: *this.limit,
                actual: *this.read,
            })));
        }
        Poll::Ready(Some(Ok(frame)))
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// An HTTP response travelling back through the pipeline
///
/// Headers and status can be inspected and modified by stages. The body is
/// read at most once: every reading method consumes the response.
///
/// Body readers enforce `max_body_size`:
/// - `resp.bytes().await?` reads raw bytes regardless of status
/// - `resp.checked_bytes().await?` fails with `HttpStatus` for non-2xx
/// - `resp.json::<T>().await?` and `resp.text().await?` check status too
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    version: Version,
    headers: HeaderMap,
    body: ResponseBody,
    max_body_size: usize,
}

impl Response {
    /// Response with an empty body, for stages that answer on their own
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: empty_body(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Replace the body with in-memory bytes
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = http_body_util::Full::new(body.into())
            .map_err(|never| match never {})
            .boxed();
        self
    }

    /// Add a header.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, HttpError> {
        self.headers
            .append(HeaderName::try_from(name)?, HeaderValue::try_from(value)?);
        Ok(self)
    }

    pub(crate) fn from_http(response: http::Response<ResponseBody>, max_body_size: usize) -> Self {
        let (parts, body) = response.into_parts();
        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned());
        Self {
            status: parts.status,
            reason,
            version: parts.version,
            headers: parts.headers,
            body,
            max_body_size,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.reason = None;
    }

    /// Reason phrase sent by the server, or the canonical one for the status
    #[must_use]
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// `Content-Type` as a string, when present and valid
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Limit applied by `bytes()`, `checked_bytes()`, `json()`, `text()` and
    /// `into_limited_body()`
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Return an error for non-2xx statuses without reading the body.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` with an empty body preview if the
    /// status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(HttpError::HttpStatus {
            status: self.status,
            body_preview: String::new(),
            content_type: self.content_type().map(str::to_owned),
        })
    }

    /// Read the body without a status check.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit and
    /// `HttpError::Transport` if reading fails.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.body, self.max_body_size).await
    }

    /// Read the body, failing for non-2xx statuses.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` (with a body preview) if the status is
    /// not 2xx and `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn checked_bytes(self) -> Result<Bytes, HttpError> {
        if !self.status.is_success() {
            let content_type = self.content_type().map(str::to_owned);
            let preview_limit = self.max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
            // A too-large preview must not hide the status error
            let body_preview = match read_body_limited(self.body, preview_limit).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
                Err(e) => return Err(e),
            };
            return Err(HttpError::HttpStatus {
                status: self.status,
                body_preview,
                content_type,
            });
        }
        read_body_limited(self.body, self.max_body_size).await
    }

    /// Parse the body as JSON, failing for non-2xx statuses.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus`, `HttpError::BodyTooLarge` or
    /// `HttpError::Json`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = self.checked_bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Read the body as UTF-8 text (lossy), failing for non-2xx statuses.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` or `HttpError::BodyTooLarge`.
    pub async fn text(self) -> Result<String, HttpError> {
        let body = self.checked_bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Body as a stream, without size limit or status check.
    ///
    /// Prefer [`into_limited_body`](Self::into_limited_body) for untrusted
    /// peers.
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Body as a stream that fails once more than `max_body_size` bytes
    /// were read.
    #[must_use]
    pub fn into_limited_body(self) -> LimitedBody {
        LimitedBody::new(self.body, self.max_body_size)
    }

    /// Convert into an `http::Response`
    #[must_use]
    pub fn into_http(self) -> http::Response<ResponseBody> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        response
    }
}

fn empty_body() -> ResponseBody {
    http_body_util::Empty::new()
        .map_err(|never| match never {})
        .boxed()
}

async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    LimitedBody::new(body, limit).into_bytes().await
}
