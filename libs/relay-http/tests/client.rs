#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end client behaviour against a local mock server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use httpmock::prelude::*;
use relay_http::{
    ClientConfig, HttpClient, HttpClientBuilder, HttpError, Next, Request, Response, Stage,
};
use serde_json::json;

fn test_client(base: &str) -> HttpClient {
    HttpClientBuilder::with_config(base, ClientConfig::for_testing())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_get_json_relative_to_base() {
    #[derive(serde::Deserialize)]
    struct Message {
        name: String,
        value: i32,
    }

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(Method::GET)
                .path("/queue/messages/head")
                .query_param("timeout", "5")
                .header_exists("user-agent");
            then.status(200).json_body(json!({"name": "test", "value": 42}));
        })
        .await;

    let client = test_client(&server.url("/queue"));
    let message: Message = client
        .get("messages/head?timeout=5")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(message.name, "test");
    assert_eq!(message.value, 42);
}

#[tokio::test]
async fn test_error_status_delivered_as_response() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/missing");
            then.status(404)
                .header("content-type", "text/plain")
                .body("no such queue");
        })
        .await;

    let client = test_client(&server.base_url());
    let response = client.get("missing").await.unwrap();
    assert_eq!(response.status(), http::StatusCode::NOT_FOUND);

    let err = response.checked_bytes().await.unwrap_err();
    match err {
        HttpError::HttpStatus {
            status,
            body_preview,
            ..
        } => {
            assert_eq!(status, http::StatusCode::NOT_FOUND);
            assert_eq!(body_preview, "no such queue");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_post_with_content_type() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(Method::POST)
                .path("/messages")
                .header("content-type", "application/atom+xml;type=entry;charset=utf-8")
                .body("{\"key\":1}");
            then.status(201);
        })
        .await;

    let client = test_client(&server.base_url());
    let response = client
        .request_with_content_type(
            http::Method::POST,
            "messages",
            "{\"key\":1}",
            "application/atom+xml;type=entry;charset=utf-8",
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.status(), http::StatusCode::CREATED);
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/slow");
            then.status(200).delay(Duration::from_secs(3));
        })
        .await;

    let client = HttpClientBuilder::with_config(&server.base_url(), ClientConfig::for_testing())
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = client.get("slow").await.unwrap_err();
    assert!(matches!(err, HttpError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn test_body_size_limit() {
    let server = MockServer::start_async().await;
    let large_body = "x".repeat(64 * 1024);
    server
        .mock_async(|when, then| {
            when.path("/large");
            then.status(200).body(&large_body);
        })
        .await;

    let client = HttpClientBuilder::with_config(&server.base_url(), ClientConfig::for_testing())
        .max_body_size(1024)
        .build()
        .unwrap();

    let result = client.get("large").await.unwrap().bytes().await;
    assert!(matches!(result, Err(HttpError::BodyTooLarge { .. })));
}

#[tokio::test]
async fn test_guarantee_order_serializes_requests() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/slow");
            then.status(200).delay(Duration::from_millis(300));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/fast");
            then.status(200);
        })
        .await;

    let client = HttpClientBuilder::with_config(&server.base_url(), ClientConfig::for_testing())
        .guarantee_order(true)
        .build()
        .unwrap();

    let started = Instant::now();
    let slow = client.get("slow");
    let fast = client.get("fast");

    let fast_done = tokio::spawn(async move {
        fast.await.unwrap();
        started.elapsed()
    });
    slow.await.unwrap();

    // The fast request is only sent once the slow one has its response
    let fast_elapsed = fast_done.await.unwrap();
    assert!(fast_elapsed >= Duration::from_millis(300), "{fast_elapsed:?}");
}

/// Stamps every request and checks the response on the way back
struct Stamp;

#[async_trait]
impl Stage for Stamp {
    async fn propagate(&self, mut request: Request, next: Next<'_>) -> Result<Response, HttpError> {
        request.set_header("x-stamp", "relay")?;
        let mut response = next.propagate(request).await?;
        response.headers_mut().insert("x-seen", http::HeaderValue::from_static("1"));
        Ok(response)
    }
}

#[tokio::test]
async fn test_user_stage_wraps_exchange() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.path("/stamped").header("x-stamp", "relay");
            then.status(204);
        })
        .await;

    let client = HttpClientBuilder::with_config(&server.base_url(), ClientConfig::for_testing())
        .stage(Arc::new(Stamp))
        .build()
        .unwrap();

    let response = client.get("stamped").await.unwrap();

    mock.assert_async().await;
    assert_eq!(response.headers()["x-seen"], "1");
}

#[tokio::test]
async fn test_connection_refused() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = test_client(&format!("http://127.0.0.1:{port}"));

    let err = client.get("anything").await.unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
}
