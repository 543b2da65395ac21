use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Method;
use parking_lot::RwLock;
use tokio::task::{JoinError, JoinHandle};
use url::Url;

use crate::body::RequestBody;
use crate::builder::HttpClientBuilder;
use crate::config::ClientConfig;
use crate::error::HttpError;
use crate::order::{OrderGate, Ticket};
use crate::pipeline::{Next, Stage, Transport};
use crate::request::Request;
use crate::response::Response;
use crate::worker_pool;

type StageList = Arc<[Arc<dyn Stage>]>;

/// Asynchronous HTTP client bound to a base URI and a stage pipeline
///
/// Cheap to clone; clones share the connection pool, the stage list and the
/// ordering gate. Every request runs on the process-wide
/// [`worker_pool`](crate::worker_pool).
///
/// # Example
///
/// ```ignore
/// use relay_http::{HttpClient, Request};
///
/// let client = HttpClient::builder("https://queue.example.com/orders")
///     .timeout(Duration::from_secs(10))
///     .build()?;
///
/// let response = client.request(Request::post("messages").text("hello")).await?;
/// let head = client.get("messages/head").await?.text().await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    base: Url,
    config: Arc<ClientConfig>,
    stages: Arc<RwLock<StageList>>,
    transport: Arc<dyn Transport>,
    gate: Option<Arc<OrderGate>>,
}

impl HttpClient {
    /// Builder for a client rooted at `base_uri`
    #[must_use]
    pub fn builder(base_uri: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(base_uri)
    }

    pub(crate) fn from_parts(
        base: Url,
        config: ClientConfig,
        stages: Vec<Arc<dyn Stage>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let gate = config.guarantee_order.then(|| Arc::new(OrderGate::new()));
        Self {
            base,
            config: Arc::new(config),
            stages: Arc::new(RwLock::new(stages.into())),
            transport,
            gate,
        }
    }

    /// Start `request` and return a future for its response.
    ///
    /// The request is submitted immediately, before the future is polled.
    /// The future resolves to a [`Response`] for every HTTP status; errors
    /// are transport failures, cancellation and failures raised by stages.
    pub fn request(&self, request: Request) -> ResponseFuture {
        let stages = Arc::clone(&*self.stages.read());
        let ticket = self.gate.as_ref().map(OrderGate::take_ticket);
        let handle = match worker_pool::handle() {
            Ok(handle) => handle,
            Err(e) => return ResponseFuture::failed(e),
        };

        let dispatch = Dispatch {
            base: self.base.clone(),
            buffer_request: self.config.buffer_request,
            stages,
            transport: Arc::clone(&self.transport),
        };
        ResponseFuture::spawned(handle.spawn(dispatch.run(request, ticket)))
    }

    pub fn get(&self, path: &str) -> ResponseFuture {
        self.request(Request::get(path))
    }

    pub fn post(&self, path: &str) -> ResponseFuture {
        self.request(Request::post(path))
    }

    pub fn put(&self, path: &str) -> ResponseFuture {
        self.request(Request::put(path))
    }

    pub fn patch(&self, path: &str) -> ResponseFuture {
        self.request(Request::patch(path))
    }

    pub fn delete(&self, path: &str) -> ResponseFuture {
        self.request(Request::delete(path))
    }

    pub fn head(&self, path: &str) -> ResponseFuture {
        self.request(Request::head(path))
    }

    /// Send `body` with `method` to `path`
    pub fn request_with_body(
        &self,
        method: Method,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> ResponseFuture {
        self.request(Request::new(method, path).with_body(body))
    }

    /// Send `body` with `method` to `path` and an explicit `Content-Type`.
    ///
    /// An invalid content type fails the returned future without sending.
    pub fn request_with_content_type(
        &self,
        method: Method,
        path: &str,
        body: impl Into<RequestBody>,
        content_type: &str,
    ) -> ResponseFuture {
        match Request::new(method, path)
            .with_body(body)
            .with_content_type(content_type)
        {
            Ok(request) => self.request(request),
            Err(e) => ResponseFuture::failed(e),
        }
    }

    /// Append `stage` after the existing stages.
    ///
    /// Affects requests submitted afterwards, on this client and its clones.
    pub fn add_stage(&self, stage: Arc<dyn Stage>) {
        let mut stages = self.stages.write();
        let mut extended = stages.to_vec();
        extended.push(stage);
        *stages = extended.into();
    }

    #[must_use]
    pub fn base_uri(&self) -> &Url {
        &self.base
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base", &self.base.as_str())
            .field("stages", &self.stages.read().len())
            .field("guarantee_order", &self.gate.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything a spawned request needs, detached from the client
struct Dispatch {
    base: Url,
    buffer_request: bool,
    stages: StageList,
    transport: Arc<dyn Transport>,
}

impl Dispatch {
    async fn run(self, mut request: Request, ticket: Option<Ticket>) -> Result<Response, HttpError> {
        // Dropping `ticket` on any early return gives up its place in line
        if request.is_cancelled() {
            return Err(HttpError::Cancelled);
        }
        request.resolve_against(&self.base)?;
        if self.buffer_request {
            let body = request.take_body().into_replayable();
            request.set_body(body);
        }

        let turn = match ticket {
            Some(ticket) => Some(ticket.wait_turn(request.cancellation_token()).await?),
            None => None,
        };

        tracing::trace!(
            method = %request.method(),
            uri = %request.target(),
            stages = self.stages.len(),
            "dispatching request"
        );
        let result = Next::new(&self.stages, self.transport.as_ref())
            .propagate(request)
            .await;
        drop(turn);
        result
    }
}

/// Future returned by [`HttpClient::request`]
///
/// Completes exactly once. Dropping it does not cancel the request; use the
/// request's cancellation token for that.
#[must_use = "the response is lost unless the future is awaited"]
pub struct ResponseFuture {
    state: FutureState,
}

enum FutureState {
    Spawned(JoinHandle<Result<Response, HttpError>>),
    Failed(Option<HttpError>),
}

impl ResponseFuture {
    fn spawned(handle: JoinHandle<Result<Response, HttpError>>) -> Self {
        Self {
            state: FutureState::Spawned(handle),
        }
    }

    fn failed(err: HttpError) -> Self {
        Self {
            state: FutureState::Failed(Some(err)),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, HttpError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Spawned(handle) => Pin::new(handle).poll(cx).map(flatten_join),
            FutureState::Failed(err) => Poll::Ready(Err(err.take().unwrap_or(HttpError::ServiceClosed))),
        }
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            FutureState::Spawned(_) => "spawned",
            FutureState::Failed(_) => "failed",
        };
        f.debug_struct("ResponseFuture").field("state", &state).finish()
    }
}

fn flatten_join(joined: Result<Result<Response, HttpError>, JoinError>) -> Result<Response, HttpError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(HttpError::ServiceClosed),
    }
}
