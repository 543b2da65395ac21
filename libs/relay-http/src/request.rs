use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::body::{RequestBody, TransportBody};
use crate::error::{HttpError, InvalidUriKind};

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// An outgoing HTTP request
///
/// The target may be absolute or relative to the client's base URI; the
/// client resolves it before the first stage sees the request. Once handed to
/// [`HttpClient::request`](crate::HttpClient::request) the request is owned
/// by the in-flight operation.
///
/// # Example
///
/// ```ignore
/// use relay_http::Request;
///
/// let request = Request::post("messages")
///     .with_header("x-request-id", "abc123")?
///     .json(&serde_json::json!({ "key": "value" }))?;
/// let response = client.request(request).await?;
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: RequestBody,
    cancel: CancellationToken,
}

impl Request {
    /// Request with no headers, an empty body and a token that is never
    /// cancelled
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    #[must_use]
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    #[must_use]
    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    #[must_use]
    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    #[must_use]
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    #[must_use]
    pub fn head(target: impl Into<String>) -> Self {
        Self::new(Method::HEAD, target)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Target as given, or the resolved absolute URI once the client has
    /// accepted the request
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    /// Parse the target as an absolute URL.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` with kind `Relative` for a target that
    /// has not been resolved against a base URI yet.
    pub fn url(&self) -> Result<Url, HttpError> {
        Url::parse(&self.target).map_err(|e| HttpError::InvalidUri {
            url: self.target.clone(),
            kind: match e {
                url::ParseError::RelativeUrlWithoutBase => InvalidUriKind::Relative,
                url::ParseError::EmptyHost => InvalidUriKind::MissingAuthority,
                _ => InvalidUriKind::ParseError,
            },
            reason: e.to_string(),
        })
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set a header, replacing any existing values for `name`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Add a header value, keeping existing values for `name`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Builder form of [`set_header`](Self::set_header).
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, HttpError> {
        self.set_header(name, value)?;
        Ok(self)
    }

    /// Set `Content-Type`.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` for an invalid value.
    pub fn with_content_type(mut self, content_type: &str) -> Result<Self, HttpError> {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_str(content_type)?);
        Ok(self)
    }

    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<RequestBody>) {
        self.body = body.into();
    }

    /// Take the body, leaving an empty one in its place
    pub fn take_body(&mut self) -> RequestBody {
        std::mem::take(&mut self.body)
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the body to `value` serialized as JSON. `Content-Type` defaults to
    /// `application/json` unless already set.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        self.body = RequestBody::from(serde_json::to_vec(value)?);
        self.default_content_type(JSON_CONTENT_TYPE);
        Ok(self)
    }

    /// Set the body to `value` form URL-encoded. `Content-Type` defaults to
    /// `application/x-www-form-urlencoded` unless already set.
    ///
    /// # Errors
    /// Returns `HttpError::FormEncode` if encoding fails.
    pub fn form<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        self.body = RequestBody::from(serde_urlencoded::to_string(value)?);
        self.default_content_type(FORM_CONTENT_TYPE);
        Ok(self)
    }

    /// Set a UTF-8 text body. `Content-Type` defaults to
    /// `text/plain; charset=utf-8` unless already set.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = RequestBody::from(text.into());
        self.default_content_type(TEXT_CONTENT_TYPE);
        self
    }

    fn default_content_type(&mut self, content_type: &'static str) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Copy of this request sharing its cancellation token.
    ///
    /// Returns `None` when the body is a one-shot stream.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            method: self.method.clone(),
            target: self.target.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            cancel: self.cancel.clone(),
        })
    }

    pub(crate) fn resolve_against(&mut self, base: &Url) -> Result<(), HttpError> {
        self.target = resolve_target(base, &self.target)?.into();
        Ok(())
    }

    /// Convert into the hyper request handed to the connection pool.
    pub(crate) fn into_http(
        self,
        chunk_size: usize,
    ) -> Result<http::Request<TransportBody>, HttpError> {
        let uri: http::Uri = self
            .target
            .parse()
            .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                url: self.target.clone(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?;

        let mut headers = self.headers;
        if !headers.contains_key(CONTENT_LENGTH)
            && let Some(length) = self.body.content_length().filter(|n| *n > 0)
        {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }

        let mut request = http::Request::builder()
            .method(self.method)
            .uri(uri)
            .body(self.body.into_transport_body(chunk_size))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    Ok((HeaderName::try_from(name)?, HeaderValue::try_from(value)?))
}

/// Resolve a request target against a base URI.
///
/// Absolute targets are used as-is. A relative target is appended to the
/// base path with a single `/` between them, and the queries of both are
/// kept (base first). Fragments are dropped.
///
/// # Errors
/// Returns `HttpError::InvalidUri` if the target cannot be parsed.
pub fn resolve_target(base: &Url, target: &str) -> Result<Url, HttpError> {
    match Url::parse(target) {
        Ok(mut url) => {
            url.set_fragment(None);
            Ok(url)
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(append_relative(base, target)),
        Err(e) => Err(HttpError::InvalidUri {
            url: target.to_owned(),
            kind: match e {
                url::ParseError::EmptyHost => InvalidUriKind::MissingAuthority,
                _ => InvalidUriKind::ParseError,
            },
            reason: e.to_string(),
        }),
    }
}

fn append_relative(base: &Url, relative: &str) -> Url {
    let relative = relative.split_once('#').map_or(relative, |(rest, _)| rest);
    let (path, query) = match relative.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (relative, None),
    };

    let mut url = base.clone();
    let tail = path.trim_start_matches('/');
    if !tail.is_empty() {
        let joined = format!("{}/{tail}", base.path().trim_end_matches('/'));
        url.set_path(&joined);
    }

    let query = match (
        base.query().filter(|q| !q.is_empty()),
        query.filter(|q| !q.is_empty()),
    ) {
        (Some(base_query), Some(query)) => Some(format!("{base_query}&{query}")),
        (Some(only), None) | (None, Some(only)) => Some(only.to_owned()),
        (None, None) => None,
    };
    url.set_query(query.as_deref());
    url.set_fragment(None);
    url
}
