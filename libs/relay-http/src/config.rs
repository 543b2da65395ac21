use std::time::Duration;

use url::Url;

use crate::error::{HttpError, InvalidUriKind};
use crate::oauth1::OAuth1Session;
use crate::oauth2::OAuth2Config;
use crate::secret::SecretString;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("relay-http/", env!("CARGO_PKG_VERSION"));

/// Request body frame size used when `chunk_size` is left at `0`
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default maximum response body size read by the body helpers (10 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Username/password pair
///
/// Used for `401` Basic challenges against the server and for
/// `Proxy-Authorization` on proxy tunnels.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value for an `Authorization`/`Proxy-Authorization` header using the
    /// Basic scheme. The returned value is marked sensitive.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the encoded value is not a
    /// valid header value (never happens for base64 output).
    pub fn basic_header_value(&self) -> Result<http::HeaderValue, HttpError> {
        use base64::Engine as _;

        let raw = zeroize::Zeroizing::new(format!("{}:{}", self.username, self.password.expose()));
        let encoded = zeroize::Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(raw.as_bytes()));
        let mut value = http::HeaderValue::from_str(&format!("Basic {}", encoded.as_str()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// HTTP proxy used for every connection of a client
///
/// Connections are tunnelled through the proxy with `CONNECT`, for both
/// `http` and `https` targets.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Proxy address; must be an `http://host:port` URI
    pub uri: Url,
    /// Optional credentials sent as `Proxy-Authorization: Basic ...`
    pub credentials: Option<Credentials>,
}

impl ProxyConfig {
    /// Parse a proxy URI.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the URI is malformed or has no host,
    /// and `HttpError::InvalidScheme` for schemes other than `http`.
    pub fn new(uri: &str) -> Result<Self, HttpError> {
        let parsed = Url::parse(uri).map_err(|e| HttpError::InvalidUri {
            url: uri.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" {
            return Err(HttpError::InvalidScheme {
                scheme: parsed.scheme().to_owned(),
                reason: "proxy must be an http:// URI".to_owned(),
            });
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(HttpError::InvalidUri {
                url: uri.to_owned(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "proxy URI has no host".to_owned(),
            });
        }
        Ok(Self {
            uri: parsed,
            credentials: None,
        })
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// TLS root certificate source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsRootConfig {
    /// Mozilla root bundle compiled into the binary (default)
    #[default]
    WebPki,
    /// Operating system certificate store (cached after first load)
    Native,
}

/// HTTP client configuration
///
/// Built once per client (usually through
/// [`HttpClientBuilder`](crate::HttpClientBuilder)) and read-only afterwards.
#[derive(Clone, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct ClientConfig {
    /// Time allowed until response headers arrive (default: 30s)
    pub timeout: Duration,

    /// Maximum request body frame size in bytes; `0` selects
    /// [`DEFAULT_CHUNK_SIZE`]
    pub chunk_size: usize,

    /// Serialize requests so responses are delivered in submission order
    /// (default: false)
    pub guarantee_order: bool,

    /// Verify server certificates (default: true)
    pub validate_certificates: bool,

    /// Copy one-shot request bodies into memory as they are sent so they can
    /// be replayed after an authentication challenge (default: false)
    pub buffer_request: bool,

    /// Transparently decompress gzip/br/deflate responses (default: false)
    ///
    /// When enabled the transport also sends `Accept-Encoding`.
    pub decompress_responses: bool,

    /// Credentials answered on a `401` Basic challenge
    pub credentials: Option<Credentials>,

    /// Proxy used for all connections
    pub proxy: Option<ProxyConfig>,

    /// OAuth1 session used to sign every request once authorized
    pub oauth1: Option<OAuth1Session>,

    /// OAuth2 bearer token configuration
    pub oauth2: Option<OAuth2Config>,

    /// Default User-Agent, applied when the request has none
    pub user_agent: String,

    /// Maximum response body size read by the body helpers (default: 10 MiB)
    pub max_body_size: usize,

    /// Idle timeout for pooled connections (default: 90s, `None` keeps them)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,

    /// TLS root certificate source
    pub tls_roots: TlsRootConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
            guarantee_order: false,
            validate_certificates: true,
            buffer_request: false,
            decompress_responses: false,
            credentials: None,
            proxy: None,
            oauth1: None,
            oauth2: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            tls_roots: TlsRootConfig::WebPki,
        }
    }
}

impl ClientConfig {
    /// Chunk size with `0` resolved to the default
    #[must_use]
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    /// Idle connections kept per host; a single connection when order is
    /// guaranteed
    #[must_use]
    pub fn effective_pool_max_idle_per_host(&self) -> usize {
        if self.guarantee_order {
            1
        } else {
            self.pool_max_idle_per_host
        }
    }

    /// Configuration for tests against local mock servers: short timeout,
    /// no pooling surprises.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            pool_idle_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }
}

/// Validate a base URI for a client.
///
/// Accepts `http`, `https`, `ws` and `wss` URIs with a non-empty host and no
/// fragment.
///
/// # Errors
/// Returns `HttpError::InvalidUri` or `HttpError::InvalidScheme` describing the
/// first violated rule.
pub fn validate_base_uri(uri: &str) -> Result<Url, HttpError> {
    let parsed = Url::parse(uri).map_err(|e| HttpError::InvalidUri {
        url: uri.to_owned(),
        kind: match e {
            url::ParseError::RelativeUrlWithoutBase => InvalidUriKind::MissingScheme,
            url::ParseError::EmptyHost => InvalidUriKind::MissingAuthority,
            _ => InvalidUriKind::ParseError,
        },
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https" | "ws" | "wss") {
        return Err(HttpError::InvalidScheme {
            scheme: parsed.scheme().to_owned(),
            reason: "base URI must start with http://, https://, ws:// or wss://".to_owned(),
        });
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(HttpError::InvalidUri {
            url: uri.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host".to_owned(),
        });
    }
    if parsed.fragment().is_some() {
        return Err(HttpError::InvalidUri {
            url: uri.to_owned(),
            kind: InvalidUriKind::Fragment,
            reason: "base URI must not carry a fragment".to_owned(),
        });
    }
    Ok(parsed)
}
