//! The forwarding pipeline: identify, record, forward, record, reply.

use bytes::Bytes;
use chrono::Local;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{BackendTarget, ProxyConfig};
use crate::error::Result;
use crate::exchange::{CapturedRequest, CapturedResponse, InterceptedExchange};
use crate::identity::IdentityResolver;
use crate::transcript::{TranscriptError, TranscriptSession};

pub mod forward;

pub use forward::{BackendClient, ForwardError};

pub struct AirPrintProxy {
    backend: BackendTarget,
    client: BackendClient,
    resolver: IdentityResolver,
    transcript: Arc<TranscriptSession>,
    request_timeout: Option<Duration>,
}

impl AirPrintProxy {
    /// Build the pipeline from configuration. Opens the transcript session
    /// when diagnostics are on and probes for a neighbor-table strategy.
    pub async fn new(config: &ProxyConfig) -> Result<Self> {
        let backend = config.backend()?;
        let transcript =
            Arc::new(TranscriptSession::open(&config.transcript_dir, config.debug).await);
        let resolver = IdentityResolver::detect();
        debug!(strategy = resolver.strategy(), "Neighbor table lookup selected");

        Ok(Self::from_parts(
            backend,
            resolver,
            transcript,
            config.connect_timeout(),
            config.request_timeout(),
        ))
    }

    pub fn from_parts(
        backend: BackendTarget,
        resolver: IdentityResolver,
        transcript: Arc<TranscriptSession>,
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            client: forward::build_client(connect_timeout),
            resolver,
            transcript,
            request_timeout,
        }
    }

    pub fn with_resolver(mut self, resolver: IdentityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn backend(&self) -> &BackendTarget {
        &self.backend
    }

    pub fn transcript(&self) -> &Arc<TranscriptSession> {
        &self.transcript
    }

    /// Serve one inbound request from `peer` (`ip:port` as reported by the
    /// listener). Always produces a response; backend failures become 502/504.
    pub async fn handle<B>(&self, request: Request<B>, peer: &str) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let id = Uuid::new_v4();
        let span = info_span!("exchange", %id);
        self.process(id, request, peer).instrument(span).await
    }

    async fn process<B>(&self, id: Uuid, request: Request<B>, peer: &str) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let identity = self.resolver.identify(peer).await;
        info!(
            client_ip = %identity.network_address,
            client_mac = %identity.hardware_address,
            method = %request.method(),
            uri = %request.uri(),
            "Received AirPrint request"
        );

        let (parts, body) = request.into_parts();
        let (body, read_failed) = match body.collect().await {
            Ok(collected) => (collected.to_bytes(), false),
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                (Bytes::new(), true)
            }
        };

        let mut exchange = InterceptedExchange::new(
            id,
            identity,
            CapturedRequest {
                method: parts.method,
                uri: parts.uri,
                version: parts.version,
                headers: parts.headers,
                body,
            },
        );

        note_transcript(
            self.transcript
                .log_request(&exchange.request, &exchange.identity)
                .await,
        );

        if read_failed {
            let failure = failure_response(StatusCode::BAD_REQUEST);
            note_transcript(self.transcript.log_response(&failure).await);
            return into_response(&failure);
        }

        let outcome = match forward::outbound_request(
            &exchange.request,
            &self.backend,
            &exchange.identity.network_address,
        ) {
            Ok(outbound) => forward::send(&self.client, outbound, self.request_timeout).await,
            Err(e) => Err(e),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    error = %e,
                    backend = %self.backend,
                    path = exchange.path_and_query(),
                    "Backend request failed"
                );
                let failure = gateway_failure(&e);
                // Keeps request/response blocks paired in the transcript.
                note_transcript(self.transcript.log_response(&failure).await);
                return into_response(&failure);
            }
        };

        note_transcript(self.transcript.log_response(&response).await);
        let reply = into_response(&response);
        let status = response.status;
        exchange.response = Some(response);

        info!(
            status = status.as_u16(),
            elapsed_ms = (Local::now() - exchange.received_at).num_milliseconds(),
            "Proxied AirPrint request from {} -> {}",
            exchange.identity.network_address,
            self.backend
        );
        reply
    }
}

fn note_transcript(result: std::result::Result<(), TranscriptError>) {
    match result {
        Ok(()) => {}
        Err(TranscriptError::Closed) => debug!("Transcript closed, block dropped"),
        Err(e) => warn!(error = %e, "Transcript write failed"),
    }
}

/// Client-facing response carrying its own handle on the buffered body.
fn into_response(captured: &CapturedResponse) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(captured.body.clone()));
    *response.status_mut() = captured.status;
    *response.headers_mut() = captured.headers.clone();
    response
}

fn gateway_failure(err: &ForwardError) -> CapturedResponse {
    failure_response(err.status_code())
}

/// Plain-text response whose body is the status's canonical reason.
fn failure_response(status: StatusCode) -> CapturedResponse {
    let body = Bytes::from(status.canonical_reason().unwrap_or("Bad Gateway"));
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(http::header::CONTENT_LENGTH, body.len().into());
    CapturedResponse {
        status,
        version: http::Version::HTTP_11,
        headers,
        body,
    }
}
