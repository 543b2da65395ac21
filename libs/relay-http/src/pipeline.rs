//! Stage chain between [`HttpClient::request`](crate::HttpClient::request)
//! and the network.
//!
//! A request enters the first registered [`Stage`], which may modify it and
//! forward it through [`Next`], or answer on its own. The last link is the
//! [`Transport`], which performs the exchange. Responses travel back through
//! the same stages in reverse order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;

/// One link in the processing chain.
///
/// # Example
///
/// ```ignore
/// struct RequestId;
///
/// #[async_trait]
/// impl Stage for RequestId {
///     async fn propagate(&self, mut request: Request, next: Next<'_>) -> Result<Response, HttpError> {
///         request.set_header("x-request-id", &uuid())?;
///         let mut response = next.propagate(request).await?;
///         response.headers_mut().remove("x-internal");
///         Ok(response)
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Handle `request`, optionally forwarding it through `next`.
    ///
    /// `next` can be used at most once. Errors of the stage's own logic are
    /// returned without forwarding; errors from `next` are passed through
    /// unless the stage recovers from them.
    async fn propagate(&self, request: Request, next: Next<'_>) -> Result<Response, HttpError>;
}

/// Terminal link that performs network I/O
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: Request) -> Result<Response, HttpError>;
}

/// The rest of the chain after the current stage
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    /// Chain starting at the first of `stages`
    #[must_use]
    pub fn new(stages: &'a [Arc<dyn Stage>], transport: &'a dyn Transport) -> Self {
        Self { stages, transport }
    }

    /// Number of stages left before the transport
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }

    /// Hand `request` to the next stage, or to the transport when no stages
    /// remain.
    ///
    /// # Errors
    /// Returns `HttpError::Cancelled` without forwarding when the request's
    /// token is cancelled; otherwise whatever the rest of the chain returns.
    pub async fn propagate(self, request: Request) -> Result<Response, HttpError> {
        if request.is_cancelled() {
            return Err(HttpError::Cancelled);
        }
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .propagate(request, Next::new(rest, self.transport))
                    .await
            }
            None => self.transport.send(request).await,
        }
    }
}

/// An ordered, immutable list of stages ending in a transport
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Stage>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            stages: stages.into(),
            transport,
        }
    }

    /// Copy of this pipeline with `stage` appended after the existing stages
    #[must_use]
    pub fn with_stage(&self, stage: Arc<dyn Stage>) -> Self {
        let mut stages = self.stages.to_vec();
        stages.push(stage);
        Self::new(stages, Arc::clone(&self.transport))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run `request` through every stage and the transport.
    ///
    /// # Errors
    /// Returns the first error produced along the chain.
    pub async fn run(&self, request: Request) -> Result<Response, HttpError> {
        Next::new(&self.stages, self.transport.as_ref())
            .propagate(request)
            .await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod testing {
    //! In-process transport used by stage tests.

    use super::{Stage, Transport, async_trait};
    use crate::error::HttpError;
    use crate::request::Request;
    use crate::response::Response;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// What the transport saw for one request
    #[derive(Debug, Clone)]
    pub struct SeenRequest {
        pub method: Method,
        pub target: String,
        pub headers: HeaderMap,
        pub body: Bytes,
    }

    /// Records every request and answers with queued responses, `200 OK`
    /// once the queue is empty.
    #[derive(Default)]
    pub struct EchoTransport {
        seen: Mutex<Vec<SeenRequest>>,
        replies: Mutex<VecDeque<Response>>,
    }

    impl EchoTransport {
        pub fn reply_with(&self, response: Response) {
            self.replies.lock().push_back(response);
        }

        pub fn requests(&self) -> Vec<SeenRequest> {
            self.seen.lock().clone()
        }

        pub fn last_request(&self) -> Option<SeenRequest> {
            self.seen.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, mut request: Request) -> Result<Response, HttpError> {
            let body = request.take_body().collect().await?;
            self.seen.lock().push(SeenRequest {
                method: request.method().clone(),
                target: request.target().to_owned(),
                headers: request.headers().clone(),
                body,
            });
            let reply = self.replies.lock().pop_front();
            Ok(reply.unwrap_or_else(|| Response::new(StatusCode::OK)))
        }
    }

    pub async fn run(
        stages: &[Arc<dyn Stage>],
        transport: &dyn Transport,
        request: Request,
    ) -> Result<Response, HttpError> {
        super::Next::new(stages, transport).propagate(request).await
    }
}
