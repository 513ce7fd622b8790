//! Buffered request/response pairs flowing through the proxy.
//!
//! Bodies are read fully into [`Bytes`] once. The transcript writer borrows
//! them, and the onward path hands out its own cheap clone, so logging can
//! never drain what the client or backend receives.

use bytes::Bytes;
use chrono::{DateTime, Local};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use uuid::Uuid;

use crate::identity::ClientIdentity;

/// An inbound request exactly as received.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A backend response with its body fully buffered.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One request and its eventual response, owned by the task serving it.
#[derive(Debug)]
pub struct InterceptedExchange {
    pub id: Uuid,
    pub received_at: DateTime<Local>,
    pub identity: ClientIdentity,
    pub request: CapturedRequest,
    pub response: Option<CapturedResponse>,
}

impl InterceptedExchange {
    pub fn new(id: Uuid, identity: ClientIdentity, request: CapturedRequest) -> Self {
        Self {
            id,
            received_at: Local::now(),
            identity,
            request,
            response: None,
        }
    }

    /// Path and query as sent by the client, `/` when absent.
    pub fn path_and_query(&self) -> &str {
        self.request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }
}
