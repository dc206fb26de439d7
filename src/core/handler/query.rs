// src/core/handler/query.rs

//! The query endpoint.
//!
//! A query runs on the blocking pool against the caller's session and its
//! output is streamed back as CSV. The response status is decided by the
//! first thing the engine produces: an error before any output becomes a
//! `500`, anything else becomes a `200` whose body is streamed as it is
//! encoded. A failure after output has started can no longer change the
//! status, so it aborts the body instead.

use crate::connection::ConnectionIdentity;
use crate::core::GatewayError;
use crate::core::engine::Interrupt;
use crate::core::metrics;
use crate::core::protocol::{ChannelSink, StreamingResultEncoder};
use crate::core::session::SessionLease;
use crate::core::state::GatewayState;
use axum::body::{Body, Bytes};
use axum::extract::{Extension, FromRequest, RawQuery, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// Chunks in flight between the engine thread and the response body.
const STREAM_CHANNEL_CAPACITY: usize = 2;

/// URL parameters the query may be supplied through.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub q: Option<String>,
    pub query: Option<String>,
}

impl QueryParams {
    /// Parses a raw query string. Parsing never fails: for each name the
    /// first non-empty value is kept and anything unrecognised is ignored.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(raw) = raw else {
            return params;
        };
        for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
            let slot = match name.as_ref() {
                "q" => &mut params.q,
                "query" => &mut params.query,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// Resolves the query text of a request.
///
/// The body wins if it is non-empty, then the `q` parameter, then `query`.
pub fn read_query(body: &[u8], params: &QueryParams) -> Result<String, GatewayError> {
    if !body.is_empty() {
        return String::from_utf8(body.to_vec())
            .map_err(|_| GatewayError::BadRequest("Query must be valid UTF-8".into()));
    }
    [params.q.as_deref(), params.query.as_deref()]
        .into_iter()
        .flatten()
        .find(|q| !q.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| GatewayError::BadRequest("No queries, please specify a query".into()))
}

pub(super) async fn handle_query(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    identity: Option<Extension<ConnectionIdentity>>,
    RawQuery(raw_query): RawQuery,
    request: Request,
) -> Response {
    if method != Method::GET && method != Method::POST {
        return GatewayError::NotFound.into_response();
    }
    // The body is read only once the method is known to be served.
    let body = match Bytes::from_request(request, &state).await {
        Ok(body) => body,
        Err(rejection) => return rejection.into_response(),
    };

    let identity = identity.map(|Extension(identity)| identity);
    let params = if body.is_empty() {
        QueryParams::parse(raw_query.as_deref())
    } else {
        QueryParams::default()
    };
    match run_query(state, identity, &params, &body).await {
        Ok(response) => response,
        Err(e) => {
            metrics::QUERY_ERRORS_TOTAL
                .with_label_values(&[e.kind()])
                .inc();
            match &e {
                GatewayError::BadRequest(_) => debug!("rejected query request: {}", e),
                _ => error!("query failed: {}", e),
            }
            e.into_response()
        }
    }
}

async fn run_query(
    state: Arc<GatewayState>,
    identity: Option<ConnectionIdentity>,
    params: &QueryParams,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let query = read_query(body, params)?;
    metrics::QUERIES_TOTAL.inc();

    let identity = identity.ok_or(GatewayError::IdentityMissing)?;
    info!("query={:?} connID={}", query, identity.session_id);

    let session = state
        .registry
        .get_or_create_session(identity.session_id)
        .await?;
    let lease = session.acquire().await?;

    stream_query(&state, lease, query).await
}

/// Runs `query` on the blocking pool and turns its output into a response.
async fn stream_query(
    state: &GatewayState,
    lease: SessionLease,
    query: String,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let session_id = lease.session_id();
    let mut cancellation =
        QueryCancellation::new(lease.interrupter(), state.config.session.query_timeout);

    let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let output = state.config.output.clone();
    let producer: JoinHandle<()> = tokio::task::spawn_blocking(move || {
        let mut lease = lease;
        let mut encoder = StreamingResultEncoder::new(&output, ChannelSink::new(tx.clone()));
        let outcome = lease
            .execute(&query, &mut encoder)
            .and_then(|()| encoder.finish());
        // The engine goes back to the session before the stream is allowed to end.
        drop(lease);
        match outcome {
            Ok(summary) => debug!(
                "connID={} produced {} result sets, {} rows, {} bytes",
                session_id, summary.result_sets, summary.rows, summary.bytes
            ),
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
            }
        }
    });

    let first = match rx.recv().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => {
            cancellation.disarm();
            metrics::QUERY_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
            return Err(e);
        }
        None => {
            producer.await?;
            cancellation.disarm();
            metrics::QUERY_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
            return Ok(csv_response(Body::empty()));
        }
    };

    let stream = async_stream::stream! {
        let mut cancellation = cancellation;
        yield Ok::<Bytes, io::Error>(first);

        let mut failure = None;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if failure.is_none() {
            failure = producer.await.err().map(GatewayError::from);
        }

        cancellation.disarm();
        metrics::QUERY_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        if let Some(e) = failure {
            metrics::QUERY_ERRORS_TOTAL
                .with_label_values(&[e.kind()])
                .inc();
            warn!(
                "aborting response for connID={} after output started: {}",
                session_id, e
            );
            yield Err(io::Error::other(e.to_string()));
        }
    };

    Ok(csv_response(Body::from_stream(stream)))
}

fn csv_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CSV_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Interrupts the running query unless disarmed.
///
/// Dropping an armed guard means the response went away before the engine
/// finished, so the engine is told to stop. With a timeout configured, a
/// timer interrupts the engine once the limit passes.
struct QueryCancellation {
    interrupter: Arc<dyn Interrupt>,
    timer: Option<JoinHandle<()>>,
    armed: bool,
}

impl QueryCancellation {
    fn new(interrupter: Arc<dyn Interrupt>, timeout: Option<Duration>) -> Self {
        let timer = timeout.map(|limit| {
            let interrupter = interrupter.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!("query exceeded {:?}, interrupting", limit);
                interrupter.interrupt();
            })
        });
        Self {
            interrupter,
            timer,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for QueryCancellation {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.armed {
            debug!("response dropped before the query finished, interrupting");
            self.interrupter.interrupt();
        }
    }
}
