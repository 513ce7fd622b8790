//! Outbound half of the pipeline: request rewriting and the backend client.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Request, StatusCode, Uri, Version};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::config::BackendTarget;
use crate::exchange::{CapturedRequest, CapturedResponse};

pub type BackendClient = Client<HttpConnector, Full<Bytes>>;

/// Connection-scoped headers that must not cross the proxy.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Backend timed out: {0}")]
    Timeout(String),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend exchange failed: {0}")]
    Upstream(String),

    #[error("Cannot build backend request: {0}")]
    InvalidRequest(String),
}

impl ForwardError {
    /// Gateway status returned to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn from_client(err: hyper_util::client::legacy::Error) -> Self {
        let detail = error_chain(&err);
        if is_timeout(&err) {
            ForwardError::Timeout(detail)
        } else if err.is_connect() {
            ForwardError::Unreachable(detail)
        } else {
            ForwardError::Upstream(detail)
        }
    }
}

fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// `outer: inner: root` rendering of an error and its sources.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        out.push_str(": ");
        out.push_str(&e.to_string());
        current = e.source();
    }
    out
}

/// Pooled HTTP/1.1 client. Redirects are never followed.
pub fn build_client(connect_timeout: Duration) -> BackendClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Append the client address to `X-Forwarded-For`.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: &str) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(X_FORWARDED_FOR, value);
        }
        Err(e) => tracing::debug!(error = %e, "Skipping X-Forwarded-For"),
    }
}

/// Rewrite a captured request for the backend. Method, path, query, the
/// remaining headers and the body are carried over unchanged.
pub fn outbound_request(
    request: &CapturedRequest,
    backend: &BackendTarget,
    client_ip: &str,
) -> Result<Request<Full<Bytes>>, ForwardError> {
    let authority = backend.authority();
    let path_and_query = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri: Uri = format!("http://{authority}{path_and_query}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| ForwardError::InvalidRequest(e.to_string()))?;
    let host = HeaderValue::from_str(&authority)
        .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;

    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    append_forwarded_for(&mut headers, client_ip);
    headers.insert(header::HOST, host);

    let mut outbound = Request::new(Full::new(request.body.clone()));
    *outbound.method_mut() = request.method.clone();
    *outbound.uri_mut() = uri;
    *outbound.version_mut() = Version::HTTP_11;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

/// Send one request and buffer the whole response. With `deadline` set, the
/// exchange including the body read must finish in time.
pub async fn send(
    client: &BackendClient,
    outbound: Request<Full<Bytes>>,
    deadline: Option<Duration>,
) -> Result<CapturedResponse, ForwardError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, exchange(client, outbound))
            .await
            .map_err(|_| ForwardError::Timeout(format!("no response within {limit:?}")))?,
        None => exchange(client, outbound).await,
    }
}

async fn exchange(
    client: &BackendClient,
    outbound: Request<Full<Bytes>>,
) -> Result<CapturedResponse, ForwardError> {
    let response = client
        .request(outbound)
        .await
        .map_err(ForwardError::from_client)?;

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| ForwardError::Upstream(error_chain(&e)))?
        .to_bytes();

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    Ok(CapturedResponse {
        status: parts.status,
        version: parts.version,
        headers,
        body,
    })
}
