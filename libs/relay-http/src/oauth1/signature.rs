//! Signature base string construction and request signing (RFC 5849 §3.4).

use base64::Engine as _;
use hmac::{Hmac, Mac};
use http::HeaderValue;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;
use url::Url;

use super::{OAuth1Config, OAuth1Error, OAuth1State, OAuth1Token, ParameterDelivery, SignatureMethod};
use crate::error::HttpError;
use crate::request::Request;

/// RFC 3986 unreserved characters pass through; everything else is encoded
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

type HmacSha1 = Hmac<Sha1>;

/// Percent-encode per RFC 3986 (uppercase hex, unreserved set kept)
#[must_use]
pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986).to_string()
}

/// `scheme://host[:port]path` with default ports omitted
#[must_use]
pub fn base_string_uri(url: &Url) -> String {
    let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    // `Url::port` is `None` for the scheme's default port
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());
    out
}

/// Protocol parameters other than `oauth_signature`
#[must_use]
pub fn protocol_parameters(
    config: &OAuth1Config,
    token: Option<&OAuth1Token>,
    state: &OAuth1State,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("oauth_consumer_key".to_owned(), config.consumer_key.clone()),
        ("oauth_nonce".to_owned(), state.nonce.clone()),
        ("oauth_signature_method".to_owned(), config.method.as_str().to_owned()),
        ("oauth_timestamp".to_owned(), state.timestamp.clone()),
    ];
    if let Some(token) = token.filter(|t| !t.token.is_empty()) {
        params.push(("oauth_token".to_owned(), token.token.clone()));
    }
    params.push(("oauth_version".to_owned(), "1.0".to_owned()));
    if let Some((key, value)) = &state.extra {
        params.push((key.clone(), value.clone()));
    }
    params
}

/// Build the signature base string.
///
/// `form_body` is the raw `application/x-www-form-urlencoded` body, when the
/// request carries one in memory. Its parameters are signed alongside the
/// query and protocol parameters.
#[must_use]
pub fn signature_base_string(
    method: &http::Method,
    url: &Url,
    form_body: Option<&[u8]>,
    oauth_params: &[(String, String)],
) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
        .collect();
    if let Some(body) = form_body {
        pairs.extend(
            url::form_urlencoded::parse(body).map(|(k, v)| (percent_encode(&k), percent_encode(&v))),
        );
    }
    pairs.extend(
        oauth_params
            .iter()
            .map(|(k, v)| (percent_encode(k), percent_encode(v))),
    );
    pairs.sort();

    let normalized = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.as_str().to_ascii_uppercase(),
        percent_encode(&base_string_uri(url)),
        percent_encode(&normalized)
    )
}

/// Compute `oauth_signature` over a base string.
///
/// # Errors
/// Returns `OAuth1Error::Config` if the HMAC key is rejected.
pub fn sign(
    method: SignatureMethod,
    base_string: &str,
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, OAuth1Error> {
    let key = format!("{}&{}", percent_encode(consumer_secret), percent_encode(token_secret));
    match method {
        SignatureMethod::Plaintext => Ok(key),
        SignatureMethod::HmacSha1 => {
            let mut mac = HmacSha1::new_from_slice(key.as_bytes())
                .map_err(|e| OAuth1Error::Config(format!("invalid signing key: {e}")))?;
            mac.update(base_string.as_bytes());
            Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
        }
    }
}

/// `Authorization` header value for a signed request
#[must_use]
pub fn authorization_header(
    config: &OAuth1Config,
    token: Option<&OAuth1Token>,
    state: &OAuth1State,
    signature: &str,
) -> String {
    let mut fields = Vec::with_capacity(9);
    if let Some(realm) = &config.realm {
        fields.push(format!("realm=\"{}\"", percent_encode(realm)));
    }
    fields.push("oauth_version=\"1.0\"".to_owned());
    fields.push(format!("oauth_consumer_key=\"{}\"", percent_encode(&config.consumer_key)));
    if let Some(token) = token.filter(|t| !t.token.is_empty()) {
        fields.push(format!("oauth_token=\"{}\"", percent_encode(&token.token)));
    }
    fields.push(format!("oauth_signature_method=\"{}\"", config.method.as_str()));
    fields.push(format!("oauth_timestamp=\"{}\"", percent_encode(&state.timestamp)));
    fields.push(format!("oauth_nonce=\"{}\"", percent_encode(&state.nonce)));
    fields.push(format!("oauth_signature=\"{}\"", percent_encode(signature)));
    if let Some((key, value)) = &state.extra {
        fields.push(format!("{}=\"{}\"", percent_encode(key), percent_encode(value)));
    }
    format!("OAuth {}", fields.join(", "))
}

/// Sign `request` in place.
///
/// The request target must already be absolute. Form parameters are included
/// in the signature only when the body is held in memory.
///
/// # Errors
/// Returns `OAuth1Error::Config` for missing consumer credentials and
/// `HttpError::InvalidUri` if the target is not an absolute URL.
pub fn sign_request(
    request: &mut Request,
    config: &OAuth1Config,
    token: Option<&OAuth1Token>,
    state: &OAuth1State,
) -> Result<(), HttpError> {
    config.require_consumer()?;
    let url = request.url()?;

    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE));
    let form_body = if is_form {
        request.body().as_bytes().map(|b| &b[..])
    } else {
        None
    };

    let oauth_params = protocol_parameters(config, token, state);
    let base = signature_base_string(request.method(), &url, form_body, &oauth_params);
    let token_secret = token.map_or("", |t| t.secret.expose());
    let signature = sign(config.method, &base, config.consumer_secret.expose(), token_secret)?;

    tracing::trace!(
        method = %request.method(),
        uri = %base_string_uri(&url),
        signature_method = config.method.as_str(),
        "signed OAuth1 request"
    );

    match config.delivery {
        ParameterDelivery::Header => {
            let mut value =
                HeaderValue::from_str(&authorization_header(config, token, state, &signature))?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        ParameterDelivery::Query => {
            let mut url = url;
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in &oauth_params {
                    query.append_pair(key, value);
                }
                query.append_pair("oauth_signature", &signature);
            }
            request.set_target(url.as_str());
        }
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::Method;

    fn twitter_config() -> OAuth1Config {
        OAuth1Config::new(
            "xvz1evFS4wEEPTGEFPHBog",
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
        )
    }

    fn twitter_token() -> OAuth1Token {
        OAuth1Token::new(
            "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        )
    }

    fn twitter_state() -> OAuth1State {
        OAuth1State::new("1318622958", "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg")
    }

    const TWITTER_BODY: &[u8] = b"status=Hello%20Ladies%20%2b%20Gentlemen%2c%20a%20signed%20OAuth%20request%21";

    fn twitter_base_string() -> String {
        let url = Url::parse("https://api.twitter.com/1/statuses/update.json?include_entities=true").unwrap();
        let params = protocol_parameters(&twitter_config(), Some(&twitter_token()), &twitter_state());
        signature_base_string(&Method::POST, &url, Some(TWITTER_BODY), &params)
    }

    #[test]
    fn test_percent_encode_rfc3986() {
        assert_eq!(percent_encode("Ladies + Gentlemen"), "Ladies%20%2B%20Gentlemen");
        assert_eq!(percent_encode("An encoded string!"), "An%20encoded%20string%21");
        assert_eq!(percent_encode("Dogs, Cats & Mice"), "Dogs%2C%20Cats%20%26%20Mice");
        assert_eq!(percent_encode("-._~"), "-._~");
        assert_eq!(percent_encode("\u{2603}"), "%E2%98%83");
    }

    #[test]
    fn test_base_string_uri_strips_default_ports() {
        let uri = |s: &str| base_string_uri(&Url::parse(s).unwrap());
        assert_eq!(uri("HTTP://Example.com:80/r%20v/X?id=123"), "http://example.com/r%20v/X");
        assert_eq!(uri("https://www.example.net:8080/?q=1"), "https://www.example.net:8080/");
        assert_eq!(uri("https://example.com:443/a"), "https://example.com/a");
    }

    #[test]
    fn test_twitter_base_string() {
        let expected = "POST&https%3A%2F%2Fapi.twitter.com%2F1%2Fstatuses%2Fupdate.json&\
            include_entities%3Dtrue%26oauth_consumer_key%3Dxvz1evFS4wEEPTGEFPHBog%26\
            oauth_nonce%3DkYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg%26\
            oauth_signature_method%3DHMAC-SHA1%26oauth_timestamp%3D1318622958%26\
            oauth_token%3D370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb%26\
            oauth_version%3D1.0%26status%3DHello%2520Ladies%2520%252B%2520Gentlemen%252C%2520\
            a%2520signed%2520OAuth%2520request%2521";
        assert_eq!(twitter_base_string(), expected);
    }

    #[test]
    fn test_twitter_hmac_sha1_signature() {
        let signature = sign(
            SignatureMethod::HmacSha1,
            &twitter_base_string(),
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
            "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        )
        .unwrap();
        assert_eq!(signature, "tnnArxj06cWHq44gCs1OSKk/jLY=");
    }

    #[test]
    fn test_plaintext_signature_with_empty_token_secret() {
        let signature = sign(SignatureMethod::Plaintext, "ignored", "cs", "").unwrap();
        assert_eq!(signature, "cs&");

        let config = OAuth1Config::new("ck", "cs").with_method(SignatureMethod::Plaintext);
        let header = authorization_header(&config, None, &OAuth1State::new("1", "n"), &signature);
        assert!(header.contains("oauth_signature=\"cs%26\""), "{header}");
        assert!(!header.contains("oauth_token="));
    }

    #[test]
    fn test_base_string_is_deterministic() {
        assert_eq!(twitter_base_string(), twitter_base_string());
    }

    #[test]
    fn test_base_string_is_sensitive_to_every_input() {
        let url = Url::parse("https://example.com/path?a=1").unwrap();
        let config = twitter_config();
        let token = twitter_token();
        let state = twitter_state();
        let params = protocol_parameters(&config, Some(&token), &state);
        let base = signature_base_string(&Method::GET, &url, None, &params);

        assert_ne!(base, signature_base_string(&Method::POST, &url, None, &params));
        let other_url = Url::parse("https://example.com/path?a=2").unwrap();
        assert_ne!(base, signature_base_string(&Method::GET, &other_url, None, &params));
        let other_host = Url::parse("https://example.org/path?a=1").unwrap();
        assert_ne!(base, signature_base_string(&Method::GET, &other_host, None, &params));
        assert_ne!(base, signature_base_string(&Method::GET, &url, Some(b"b=2"), &params));

        let other_nonce = OAuth1State::new(state.timestamp.clone(), "different");
        let other_params = protocol_parameters(&config, Some(&token), &other_nonce);
        assert_ne!(base, signature_base_string(&Method::GET, &url, None, &other_params));

        let other_time = OAuth1State::new("1318622959", state.nonce.clone());
        let other_params = protocol_parameters(&config, Some(&token), &other_time);
        assert_ne!(base, signature_base_string(&Method::GET, &url, None, &other_params));

        let with_extra = state.clone().with_extra("oauth_verifier", "v");
        let other_params = protocol_parameters(&config, Some(&token), &with_extra);
        assert_ne!(base, signature_base_string(&Method::GET, &url, None, &other_params));
    }

    #[test]
    fn test_header_field_order() {
        let config = twitter_config().with_realm("Photos");
        let state = twitter_state().with_extra("oauth_verifier", "abc");
        let header = authorization_header(&config, Some(&twitter_token()), &state, "sig=");
        let expected = "OAuth realm=\"Photos\", oauth_version=\"1.0\", \
            oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\", \
            oauth_token=\"370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb\", \
            oauth_signature_method=\"HMAC-SHA1\", oauth_timestamp=\"1318622958\", \
            oauth_nonce=\"kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg\", \
            oauth_signature=\"sig%3D\", oauth_verifier=\"abc\"";
        assert_eq!(header, expected);
    }

    #[test]
    fn test_sign_request_sets_sensitive_header() {
        let mut request = Request::post("https://api.twitter.com/1/statuses/update.json?include_entities=true")
            .with_content_type(FORM_CONTENT_TYPE)
            .unwrap()
            .with_body(TWITTER_BODY);
        sign_request(&mut request, &twitter_config(), Some(&twitter_token()), &twitter_state()).unwrap();

        let value = request.headers().get(AUTHORIZATION).unwrap();
        assert!(value.is_sensitive());
        let value = value.to_str().unwrap();
        assert!(value.starts_with("OAuth oauth_version=\"1.0\""));
        assert!(value.contains("oauth_signature=\"tnnArxj06cWHq44gCs1OSKk%2FjLY%3D\""), "{value}");
    }

    #[test]
    fn test_sign_request_query_delivery() {
        let config = OAuth1Config::new("ck", "cs")
            .with_method(SignatureMethod::Plaintext)
            .with_delivery(ParameterDelivery::Query);
        let mut request = Request::get("http://example.com/photos?size=original");
        sign_request(&mut request, &config, None, &OAuth1State::new("100", "nonce")).unwrap();

        assert!(request.headers().get(AUTHORIZATION).is_none());
        let url = request.url().unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("size".to_owned(), "original".to_owned()));
        assert!(pairs.contains(&("oauth_consumer_key".to_owned(), "ck".to_owned())));
        assert!(pairs.contains(&("oauth_signature".to_owned(), "cs&".to_owned())));
        assert!(pairs.contains(&("oauth_version".to_owned(), "1.0".to_owned())));
    }

    #[test]
    fn test_sign_request_requires_consumer() {
        let mut request = Request::get("http://example.com/");
        let err = sign_request(
            &mut request,
            &OAuth1Config::new("", "cs"),
            None,
            &OAuth1State::generate(),
        )
        .unwrap_err();
        assert!(matches!(err, HttpError::OAuth1(OAuth1Error::Config(_))));
    }

    #[test]
    fn test_sign_request_rejects_relative_target() {
        let mut request = Request::get("/relative");
        let err = sign_request(
            &mut request,
            &twitter_config(),
            None,
            &OAuth1State::generate(),
        )
        .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUri { .. }));
    }
}
