use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distr::Alphanumeric;

use super::OAuth1Error;
use crate::secret::SecretString;

const NONCE_LEN: usize = 32;

/// Signature algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureMethod {
    #[default]
    HmacSha1,
    Plaintext,
}

impl SignatureMethod {
    /// Wire name used in `oauth_signature_method`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::Plaintext => "PLAINTEXT",
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureMethod {
    type Err = OAuth1Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("HMAC-SHA1") {
            Ok(Self::HmacSha1)
        } else if s.eq_ignore_ascii_case("PLAINTEXT") {
            Ok(Self::Plaintext)
        } else {
            Err(OAuth1Error::UnsupportedMethod(s.to_owned()))
        }
    }
}

/// Where protocol parameters are placed on a signed request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParameterDelivery {
    /// `Authorization: OAuth ...` header
    #[default]
    Header,
    /// Appended to the request query string
    Query,
}

/// Token and its secret, either temporary or access
#[derive(Clone, Debug, Default)]
pub struct OAuth1Token {
    pub token: String,
    pub secret: SecretString,
}

impl OAuth1Token {
    #[must_use]
    pub fn new(token: impl Into<String>, secret: impl Into<SecretString>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }

    /// Both token and secret are non-empty
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !self.secret.is_empty()
    }
}

/// Consumer configuration for a provider
#[derive(Clone, Debug)]
pub struct OAuth1Config {
    pub consumer_key: String,
    pub consumer_secret: SecretString,
    /// Temporary-credential request endpoint
    pub temp_endpoint: String,
    /// Resource-owner authorization endpoint the user is sent to
    pub auth_endpoint: String,
    /// Access-token endpoint
    pub token_endpoint: String,
    /// Sent as `oauth_callback` when requesting a temporary token
    pub callback_uri: String,
    pub method: SignatureMethod,
    /// Optional `realm` in the `Authorization` header
    pub realm: Option<String>,
    pub delivery: ParameterDelivery,
}

impl OAuth1Config {
    /// Config with only consumer credentials; endpoints default to empty and
    /// the callback to `oob`.
    #[must_use]
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<SecretString>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            temp_endpoint: String::new(),
            auth_endpoint: String::new(),
            token_endpoint: String::new(),
            callback_uri: "oob".to_owned(),
            method: SignatureMethod::default(),
            realm: None,
            delivery: ParameterDelivery::default(),
        }
    }

    #[must_use]
    pub fn with_endpoints(
        mut self,
        temp_endpoint: impl Into<String>,
        auth_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.temp_endpoint = temp_endpoint.into();
        self.auth_endpoint = auth_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }

    #[must_use]
    pub fn with_callback_uri(mut self, callback_uri: impl Into<String>) -> Self {
        self.callback_uri = callback_uri.into();
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: SignatureMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: ParameterDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Consumer key and secret are both present
    #[must_use]
    pub fn has_consumer(&self) -> bool {
        !self.consumer_key.is_empty() && !self.consumer_secret.is_empty()
    }

    pub(crate) fn require_consumer(&self) -> Result<(), OAuth1Error> {
        if self.consumer_key.is_empty() {
            return Err(OAuth1Error::Config("consumer key is empty".to_owned()));
        }
        if self.consumer_secret.is_empty() {
            return Err(OAuth1Error::Config("consumer secret is empty".to_owned()));
        }
        Ok(())
    }
}

/// Per-request signing state. Generate a fresh one for every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuth1State {
    /// Seconds since the Unix epoch
    pub timestamp: String,
    pub nonce: String,
    /// Additional protocol parameter such as `oauth_verifier`
    pub extra: Option<(String, String)>,
}

impl OAuth1State {
    #[must_use]
    pub fn new(timestamp: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            nonce: nonce.into(),
            extra: None,
        }
    }

    /// Current time and a random 32-character alphanumeric nonce
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::new(timestamp.to_string(), nonce)
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra = Some((key.into(), value.into()));
        self
    }
}
