//! Wire-format rendering of captured exchanges and transcript blocks.
//!
//! Block layout:
//!
//! ```text
//!
//! ================================================================================
//! REQUEST at 2025-10-19 19:55:56.123
//! Client IP: 192.168.1.10 | MAC: 00:11:22:33:44:55
//! ================================================================================
//! POST /ipp/print HTTP/1.1
//! Host: proxy.local:631
//! Content-Type: application/ipp
//!
//! <body>
//!
//! RESPONSE at 2025-10-19 19:55:56.201
//! --------------------------------------------------------------------------------
//! HTTP/1.1 200 OK
//! Content-Type: application/ipp
//!
//! <body>
//! ```

use chrono::{DateTime, Local};
use http::HeaderMap;
use std::io::{self, Write};

use crate::exchange::{CapturedRequest, CapturedResponse};
use crate::identity::ClientIdentity;

pub const SEPARATOR_WIDTH: usize = 80;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn request_separator() -> String {
    "=".repeat(SEPARATOR_WIDTH)
}

pub fn response_separator() -> String {
    "-".repeat(SEPARATOR_WIDTH)
}

pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `content-type` -> `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn write_headers<W: Write>(out: &mut W, headers: &HeaderMap) -> io::Result<()> {
    for (name, value) in headers {
        write!(out, "{}: ", canonical_header_name(name.as_str()))?;
        out.write_all(value.as_bytes())?;
        out.write_all(b"\r\n")?;
    }
    out.write_all(b"\r\n")
}

/// Request line, headers, blank line, body.
pub fn write_request<W: Write>(out: &mut W, request: &CapturedRequest) -> io::Result<()> {
    write!(
        out,
        "{} {} {:?}\r\n",
        request.method, request.uri, request.version
    )?;
    write_headers(out, &request.headers)?;
    out.write_all(&request.body)
}

/// Status line, headers, blank line, body.
pub fn write_response<W: Write>(out: &mut W, response: &CapturedResponse) -> io::Result<()> {
    write!(
        out,
        "{:?} {} {}\r\n",
        response.version,
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("")
    )?;
    write_headers(out, &response.headers)?;
    out.write_all(&response.body)
}

pub fn dump_request(request: &CapturedRequest) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(request.body.len() + 512);
    write_request(&mut out, request)?;
    Ok(out)
}

pub fn dump_response(response: &CapturedResponse) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(response.body.len() + 512);
    write_response(&mut out, response)?;
    Ok(out)
}

/// Append a dump, or an inline error line when rendering failed.
fn push_dump(block: &mut Vec<u8>, kind: &str, dump: io::Result<Vec<u8>>) {
    match dump {
        Ok(bytes) => block.extend_from_slice(&bytes),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to dump {}", kind);
            block.extend_from_slice(format!("Error dumping {kind}: {e}\n").as_bytes());
        }
    }
}

pub fn request_block(
    request: &CapturedRequest,
    identity: &ClientIdentity,
    at: DateTime<Local>,
) -> Vec<u8> {
    request_block_from(dump_request(request), identity, at)
}

fn request_block_from(
    dump: io::Result<Vec<u8>>,
    identity: &ClientIdentity,
    at: DateTime<Local>,
) -> Vec<u8> {
    let separator = request_separator();
    let mut block = format!(
        "\n{separator}\nREQUEST at {}\n{identity}\n{separator}\n",
        format_timestamp(at)
    )
    .into_bytes();
    push_dump(&mut block, "request", dump);
    block.push(b'\n');
    block
}

pub fn response_block(response: &CapturedResponse, at: DateTime<Local>) -> Vec<u8> {
    response_block_from(dump_response(response), at)
}

fn response_block_from(dump: io::Result<Vec<u8>>, at: DateTime<Local>) -> Vec<u8> {
    let mut block = format!(
        "\nRESPONSE at {}\n{}\n",
        format_timestamp(at),
        response_separator()
    )
    .into_bytes();
    push_dump(&mut block, "response", dump);
    block.push(b'\n');
    block
}
