//! HTTP trigger.
//!
//! Each inbound request on the configured path is handed to the pipeline as
//! an [`HttpContext`]. The handler serving the request stays parked until the
//! pipeline calls [`HttpContext::done`], so the response is only sent once
//! downstream processing has finished.

use super::{HttpTriggerConfig, Trigger};
use crate::context::ExecutionContext;
use crate::errors::ChordError;
use crate::outcome::Outcome;
use crate::sequence::{sequence, Emitter, Sequence};
use crate::stages::Stage;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures::StreamExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// The response being prepared for an in-flight request.
///
/// Implements [`std::io::Write`], appending to the body.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseWriter {
    /// Sets the status code. Defaults to `200 OK`.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Returns the status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets a header, replacing previous values.
    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Returns the headers written so far.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Appends to the body.
    pub fn write_body(&mut self, bytes: impl AsRef<[u8]>) {
        self.body.extend_from_slice(bytes.as_ref());
    }

    /// Returns the body written so far.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl std::io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One in-flight HTTP request travelling through the pipeline.
///
/// [`done`](Self::done) consumes the context, so it can be called at most
/// once. Dropping the context without calling it releases the handler with
/// `500 Internal Server Error`.
pub struct HttpContext {
    request: Request<Bytes>,
    response: ResponseWriter,
    done: oneshot::Sender<Response>,
}

impl HttpContext {
    /// The request, with its body fully buffered.
    #[must_use]
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// The response writer.
    pub fn response_mut(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    /// Sends the written response and releases the handler.
    pub fn done(self) {
        if self.done.send(self.response.into_response()).is_err() {
            debug!("client went away before the response was ready");
        }
    }
}

impl std::fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

/// Serves one route and feeds its requests into a pipeline.
///
/// The listener is bound by [`HttpTrigger::bind`] and served by the first
/// production run of the trigger's stage; later starts yield an empty
/// sequence.
pub struct HttpTrigger {
    listener: Arc<Mutex<Option<TcpListener>>>,
    local_addr: SocketAddr,
    path: String,
    max_body_bytes: usize,
}

impl HttpTrigger {
    /// Binds the listener described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ChordError::Config`] for an invalid configuration and
    /// [`ChordError::Bind`] if the address cannot be bound.
    pub async fn bind(config: HttpTriggerConfig) -> Result<Self, ChordError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.address)
            .await
            .map_err(|source| ChordError::Bind {
                address: config.address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, path = %config.path, "http trigger bound");

        Ok(Self {
            listener: Arc::new(Mutex::new(Some(listener))),
            local_addr,
            path: config.path,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// The address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The route path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Trigger<HttpContext> for HttpTrigger {
    fn stage(&self, ctx: &ExecutionContext) -> Stage<HttpContext> {
        let listener = Arc::clone(&self.listener);
        let ctx = ctx.clone();
        let path = self.path.clone();
        let max_body_bytes = self.max_body_bytes;

        Stage::from_fn(move || {
            let Some(listener) = listener.lock().take() else {
                warn!(path = %path, "http trigger already started, yielding an empty sequence");
                return Sequence::closed();
            };
            let (tx, seq) = sequence();
            tokio::spawn(serve(ctx.clone(), listener, path.clone(), max_body_bytes, tx));
            seq
        })
    }
}

#[derive(Clone)]
struct HandlerState {
    ctx: ExecutionContext,
    requests: Arc<Emitter<HttpContext>>,
    max_body_bytes: usize,
}

async fn serve(
    ctx: ExecutionContext,
    listener: TcpListener,
    path: String,
    max_body_bytes: usize,
    tx: Emitter<HttpContext>,
) {
    let shutdown = ctx.child();
    let (requests, mut inbound) = sequence();
    let router = Router::new().route(&path, any(handle)).with_state(HandlerState {
        ctx: ctx.clone(),
        requests: Arc::new(requests),
        max_body_bytes,
    });

    let signal = shutdown.clone().cancelled_owned();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
        {
            error!(error = %e, "http trigger server failed");
        }
    });
    info!(path = %path, "http trigger serving");

    let mut forwarded = 0_u64;
    loop {
        tokio::select! {
            request = inbound.next() => {
                // `None` once the server has stopped and every handler returned.
                let Some(request) = request else { break };
                if tx.emit(request).await.is_err() {
                    debug!("pipeline closed, shutting down http trigger");
                    shutdown.cancel("pipeline closed");
                    break;
                }
                forwarded += 1;
            }
            () = tx.closed() => {
                shutdown.cancel("pipeline closed");
                break;
            }
        }
    }

    drop(inbound);
    if let Err(e) = server.await {
        error!(error = %e, "http trigger server task panicked");
    }
    info!(path = %path, requests = forwarded, "http trigger stopped");
    // `tx` drops here, after the listener is released.
}

async fn handle(State(state): State<HandlerState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let body = match read_body(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(BodyError::TooLarge) => {
            debug!(limit = state.max_body_bytes, "rejecting oversized body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
        Err(BodyError::Unreadable(e)) => {
            debug!(error = %e, "rejecting unreadable body");
            return (StatusCode::BAD_REQUEST, "request body unreadable").into_response();
        }
    };

    let (done, completed) = oneshot::channel();
    let http_ctx = HttpContext {
        request: Request::from_parts(parts, body),
        response: ResponseWriter::default(),
        done,
    };
    let outcome = Outcome::success(state.ctx.clone(), http_ctx);
    if state.requests.emit(outcome).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "pipeline unavailable").into_response();
    }

    match completed.await {
        Ok(response) => response,
        Err(_) => {
            warn!("http context dropped without done()");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

enum BodyError {
    TooLarge,
    Unreadable(axum::Error),
}

/// Buffers `body`, stopping as soon as it grows past `limit` bytes.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buffered = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Unreadable)?;
        if buffered.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buffered.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffered))
}
