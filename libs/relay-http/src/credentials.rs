use std::sync::Arc;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, StatusCode};

use crate::config::Credentials;
use crate::error::HttpError;
use crate::pipeline::Transport;
use crate::request::Request;
use crate::response::Response;

/// Terminal wrapper that answers a `401` Basic challenge once.
///
/// The first attempt goes out as the stages left it. When it comes back as
/// `401` with `WWW-Authenticate: Basic ...`, the request carries no
/// `Authorization` of its own and its body can be replayed, the inner
/// transport is called again with `Authorization: Basic ...`. Otherwise the
/// `401` is returned as is. Stages run once per request either way.
pub struct CredentialsTransport {
    inner: Arc<dyn Transport>,
    credentials: Credentials,
}

impl CredentialsTransport {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>, credentials: Credentials) -> Self {
        Self { inner, credentials }
    }
}

impl std::fmt::Debug for CredentialsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsTransport")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for CredentialsTransport {
    async fn send(&self, request: Request) -> Result<Response, HttpError> {
        if request.headers().contains_key(AUTHORIZATION) {
            return self.inner.send(request).await;
        }
        let Some(mut retry) = request.try_clone() else {
            tracing::trace!("body is not replayable, a 401 challenge will not be answered");
            return self.inner.send(request).await;
        };

        let response = self.inner.send(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED
            || !is_basic_challenge(response.headers())
        {
            return Ok(response);
        }
        if retry.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        tracing::debug!(
            username = %self.credentials.username,
            "answering Basic authentication challenge"
        );
        retry
            .headers_mut()
            .insert(AUTHORIZATION, self.credentials.basic_header_value()?);
        self.inner.send(retry).await
    }
}

fn is_basic_challenge(headers: &HeaderMap) -> bool {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.trim_start()
                .get(..5)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("basic"))
        })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use crate::pipeline::testing::{EchoTransport, run};
    use crate::pipeline::{Next, Stage};
    use bytes::Bytes;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn answering(echo: &Arc<EchoTransport>) -> CredentialsTransport {
        let inner: Arc<dyn Transport> = echo.clone();
        CredentialsTransport::new(inner, Credentials::new("Aladdin", "open sesame"))
    }

    fn challenge() -> Response {
        Response::new(StatusCode::UNAUTHORIZED)
            .with_header("www-authenticate", "Basic realm=\"queue\"")
            .unwrap()
    }

    /// Counts how often it is entered
    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Stage for Counter {
        async fn propagate(&self, request: Request, next: Next<'_>) -> Result<Response, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            next.propagate(request).await
        }
    }

    #[tokio::test]
    async fn test_no_challenge_single_attempt() {
        let echo = Arc::new(EchoTransport::default());
        let response = answering(&echo)
            .send(Request::get("http://localhost/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let seen = echo.requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_basic_challenge_answered_once() {
        let echo = Arc::new(EchoTransport::default());
        echo.reply_with(challenge());
        echo.reply_with(challenge());

        let response = answering(&echo)
            .send(Request::post("http://localhost/").text("payload"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let seen = echo.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1].headers[AUTHORIZATION],
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
        assert_eq!(seen[1].body, "payload");
    }

    #[tokio::test]
    async fn test_stages_run_once_when_challenge_is_answered() {
        let echo = Arc::new(EchoTransport::default());
        echo.reply_with(challenge());
        let counter = Arc::new(Counter::default());
        let stages: [Arc<dyn Stage>; 1] = [counter.clone()];

        let response = run(&stages, &answering(&echo), Request::get("http://localhost/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(echo.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_basic_challenge_returned() {
        let echo = Arc::new(EchoTransport::default());
        echo.reply_with(
            Response::new(StatusCode::UNAUTHORIZED)
                .with_header("www-authenticate", "Bearer realm=\"api\"")
                .unwrap(),
        );

        let response = answering(&echo)
            .send(Request::get("http://localhost/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(echo.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_authorization_not_replaced() {
        let echo = Arc::new(EchoTransport::default());
        echo.reply_with(challenge());

        let request = Request::get("http://localhost/")
            .with_header("authorization", "Bearer tok")
            .unwrap();
        let response = answering(&echo).send(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(echo.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_one_shot_body_not_replayed() {
        let echo = Arc::new(EchoTransport::default());
        echo.reply_with(challenge());
        let body = RequestBody::from_stream(
            stream::iter(vec![Ok::<_, crate::body::BoxError>(Bytes::from_static(b"data"))]),
            Some(4),
        );

        let response = answering(&echo)
            .send(Request::post("http://localhost/").with_body(body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(echo.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_replayable_stream_is_resent_identically() {
        let echo = Arc::new(EchoTransport::default());
        echo.reply_with(challenge());
        let body = RequestBody::from_stream(
            stream::iter(vec![
                Ok::<_, crate::body::BoxError>(Bytes::from_static(b"chunk-1;")),
                Ok(Bytes::from_static(b"chunk-2")),
            ]),
            None,
        )
        .into_replayable();

        let response = answering(&echo)
            .send(Request::post("http://localhost/").with_body(body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let seen = echo.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].body, "chunk-1;chunk-2");
        assert_eq!(seen[1].body, seen[0].body);
    }

    #[test]
    fn test_challenge_detection() {
        let mut headers = HeaderMap::new();
        headers.append(WWW_AUTHENTICATE, "Negotiate".parse().unwrap());
        assert!(!is_basic_challenge(&headers));
        headers.append(WWW_AUTHENTICATE, "basic realm=\"x\"".parse().unwrap());
        assert!(is_basic_challenge(&headers));
    }
}
