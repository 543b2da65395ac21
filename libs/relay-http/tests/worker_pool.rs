#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Worker pool shutdown. Kept in its own test binary: shutting the pool down
//! would fail requests of unrelated tests in the same process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_http::{HttpClient, HttpError, Request, Response, Transport, worker_pool};

/// Never answers
struct Stalled;

#[async_trait]
impl Transport for Stalled {
    async fn send(&self, _request: Request) -> Result<Response, HttpError> {
        std::future::pending().await
    }
}

/// Answers `204` immediately
struct Immediate;

#[async_trait]
impl Transport for Immediate {
    async fn send(&self, _request: Request) -> Result<Response, HttpError> {
        Ok(Response::new(http::StatusCode::NO_CONTENT))
    }
}

fn client(transport: Arc<dyn Transport>) -> HttpClient {
    HttpClient::builder("http://localhost")
        .transport(transport)
        .build()
        .unwrap()
}

#[test]
fn test_shutdown_fails_pending_requests_and_pool_restarts() {
    let caller = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let pending = client(Arc::new(Stalled)).get("/");
    std::thread::sleep(Duration::from_millis(50));
    assert!(worker_pool::is_running());

    worker_pool::shutdown();
    assert!(!worker_pool::is_running());
    let err = caller.block_on(pending).unwrap_err();
    assert!(matches!(err, HttpError::ServiceClosed), "got {err:?}");

    // Second shutdown is a no-op
    worker_pool::shutdown();

    let response = caller
        .block_on(client(Arc::new(Immediate)).get("/"))
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::NO_CONTENT);
    assert!(worker_pool::is_running());

    // From inside an async context the pool shuts down in the background
    caller.block_on(async { worker_pool::shutdown() });
    assert!(!worker_pool::is_running());
}
