//! Terminal stage backed by the hyper connection pool.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use parking_lot::Mutex;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

use crate::body::{BoxError, TransportBody};
use crate::config::{ClientConfig, ProxyConfig};
use crate::error::HttpError;
use crate::pipeline::Transport;
use crate::request::Request;
use crate::response::{Response, ResponseBody};
use crate::tls;

type HttpService =
    BoxCloneService<http::Request<TransportBody>, http::Response<ResponseBody>, HttpError>;

/// Performs the HTTP exchange over pooled connections
///
/// Every connection goes through rustls when the target is `https`, and
/// through a `CONNECT` tunnel when a proxy is configured. The timeout covers
/// the time until response headers arrive.
pub struct HyperTransport {
    service: Mutex<HttpService>,
    chunk_size: usize,
    max_body_size: usize,
}

impl HyperTransport {
    /// Build the connector, pool and service stack for `config`.
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if the TLS configuration cannot be built and
    /// `HttpError::Config` if the proxy URI is unusable.
    pub fn new(config: &ClientConfig) -> Result<Self, HttpError> {
        let tls = tls::client_config(config.tls_roots, config.validate_certificates)?;
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_all_versions();

        let mut tcp = HttpConnector::new();
        tcp.enforce_http(false);
        tcp.set_nodelay(true);

        let service = match &config.proxy {
            None => build_service(https.wrap_connector(tcp), config),
            Some(proxy) => {
                tracing::debug!(proxy = %proxy.uri, "tunnelling connections through proxy");
                build_service(https.wrap_connector(proxy_tunnel(proxy, tcp)?), config)
            }
        };

        Ok(Self {
            service: Mutex::new(service),
            chunk_size: config.effective_chunk_size(),
            max_body_size: config.max_body_size,
        })
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("chunk_size", &self.chunk_size)
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: Request) -> Result<Response, HttpError> {
        let cancel = request.cancellation_token().clone();
        let method = request.method().clone();
        let target = request.target().to_owned();
        let http_request = request.into_http(self.chunk_size)?;
        let service = self.service.lock().clone();
        let response_future: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<http::Response<ResponseBody>, HttpError>> + Send>,
        > = Box::pin(service.oneshot(http_request));

        tracing::debug!(%method, uri = %target, "sending request");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(%method, uri = %target, "request cancelled in flight");
                Err(HttpError::Cancelled)
            }
            result = response_future => {
                let response = result?;
                tracing::debug!(
                    %method,
                    uri = %target,
                    status = response.status().as_u16(),
                    "received response headers"
                );
                Ok(Response::from_http(response, self.max_body_size))
            }
        }
    }
}

fn proxy_tunnel(proxy: &ProxyConfig, tcp: HttpConnector) -> Result<Tunnel<HttpConnector>, HttpError> {
    let uri: http::Uri = proxy
        .uri
        .as_str()
        .parse()
        .map_err(|e| HttpError::Config(format!("invalid proxy URI: {e}")))?;
    let tunnel = Tunnel::new(uri, tcp);
    match &proxy.credentials {
        Some(credentials) => Ok(tunnel.with_auth(credentials.basic_header_value()?)),
        None => Ok(tunnel),
    }
}

fn build_service<C>(connector: C, config: &ClientConfig) -> HttpService
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let mut builder = Client::builder(TokioExecutor::new());
    // pool_timer is required for pool_idle_timeout to take effect
    builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.effective_pool_max_idle_per_host());
    if let Some(idle) = config.pool_idle_timeout {
        builder.pool_idle_timeout(idle);
    }
    let client = builder.build::<_, TransportBody>(connector);

    if config.decompress_responses {
        erase(
            ServiceBuilder::new()
                .layer(DecompressionLayer::new())
                .service(client),
            config.timeout,
        )
    } else {
        erase(client, config.timeout)
    }
}

/// Wrap `service` with the timeout and error mapping and box it
fn erase<S, B>(service: S, timeout: Duration) -> HttpService
where
    S: Service<http::Request<TransportBody>, Response = http::Response<B>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    ServiceBuilder::new()
        .layer(TimeoutLayer::new(timeout))
        .service(service)
        .map_response(box_response_body)
        .map_err(move |e: BoxError| map_tower_error(e, timeout))
        .boxed_clone()
}

fn box_response_body<B>(response: http::Response<B>) -> http::Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    http::Response::from_parts(parts, body.map_err(Into::into).boxed())
}

/// Map tower errors to `HttpError` with the configured timeout duration.
///
/// Pool errors are classified by [`HttpError::from`] so TLS failures surface
/// as `Tls`; typed `HttpError`s boxed by a layer are passed through.
fn map_tower_error(err: BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }
    let err = match err.downcast::<hyper_util::client::legacy::Error>() {
        Ok(pool_err) => return HttpError::from(*pool_err),
        Err(other) => other,
    };
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}
