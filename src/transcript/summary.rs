//! Reading transcripts back: one summary line per exchange.
//!
//! Responses are paired with the oldest request still waiting for one. When
//! exchanges overlap this is a heuristic, since the transcript does not tag
//! blocks with an exchange id.

use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::OnceLock;

use super::dump::{request_separator, response_separator};

const REQUEST_MARKER: &str = "REQUEST at ";
const RESPONSE_MARKER: &str = "RESPONSE at ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeSummary {
    pub index: usize,
    pub timestamp: String,
    pub client_ip: String,
    pub client_mac: String,
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub response: Option<ResponseSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSummary {
    pub timestamp: String,
    pub status: u16,
    pub reason: String,
    pub content_length: Option<u64>,
}

struct Patterns {
    client: Regex,
    request_line: Regex,
    status_line: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        client: Regex::new(r"^Client IP: ([^|]+?) \| MAC: (.+)$").expect("client pattern"),
        request_line: Regex::new(r"^([A-Z]+) (\S+) HTTP/[\d.]+$").expect("request pattern"),
        status_line: Regex::new(r"^HTTP/[\d.]+ (\d{3}) ?(.*)$").expect("status pattern"),
    })
}

/// Header lines following a start line, up to the blank separator line.
struct HeaderBlock<'a> {
    start_line: &'a str,
    headers: Vec<(&'a str, &'a str)>,
}

impl<'a> HeaderBlock<'a> {
    fn read(lines: &[&'a str]) -> Option<Self> {
        let (start_line, rest) = lines.split_first()?;
        let headers = rest
            .iter()
            .copied()
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect();
        Some(Self {
            start_line: *start_line,
            headers,
        })
    }

    fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }
}

/// Parse transcript text into exchange summaries, in request order.
///
/// Bodies are opaque and may contain anything, so blocks are only recognised
/// by their full framing: separator, marker line, and header lines.
pub fn parse_transcript(contents: &str) -> Vec<ExchangeSummary> {
    let patterns = patterns();
    let lines: Vec<&str> = contents
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let request_sep = request_separator();
    let response_sep = response_separator();

    let mut summaries: Vec<ExchangeSummary> = Vec::new();
    let mut pending: VecDeque<usize> = VecDeque::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(timestamp) = line.strip_prefix(REQUEST_MARKER) {
            if i == 0 || lines[i - 1] != request_sep {
                continue;
            }
            let Some(client) = lines.get(i + 1).and_then(|l| patterns.client.captures(l)) else {
                continue;
            };
            if lines.get(i + 2) != Some(&request_sep.as_str()) {
                continue;
            }
            let Some(block) = lines.get(i + 3..).and_then(HeaderBlock::read) else {
                continue;
            };
            let (method, path) = match patterns.request_line.captures(block.start_line) {
                Some(caps) => (caps[1].to_string(), caps[2].to_string()),
                None => ("Unknown".to_string(), "Unknown".to_string()),
            };

            pending.push_back(summaries.len());
            summaries.push(ExchangeSummary {
                index: summaries.len() + 1,
                timestamp: timestamp.trim().to_string(),
                client_ip: client[1].trim().to_string(),
                client_mac: client[2].trim().to_string(),
                method,
                path,
                content_type: block.header("content-type").map(str::to_string),
                content_length: block.content_length(),
                response: None,
            });
        } else if let Some(timestamp) = line.strip_prefix(RESPONSE_MARKER) {
            if lines.get(i + 1) != Some(&response_sep.as_str()) {
                continue;
            }
            let Some(block) = lines.get(i + 2..).and_then(HeaderBlock::read) else {
                continue;
            };
            let Some(status) = patterns.status_line.captures(block.start_line) else {
                continue;
            };
            let Some(owner) = pending.pop_front() else {
                continue;
            };

            summaries[owner].response = Some(ResponseSummary {
                timestamp: timestamp.trim().to_string(),
                status: status[1].parse().unwrap_or_default(),
                reason: status[2].trim().to_string(),
                content_length: block.content_length(),
            });
        }
    }

    summaries
}

/// Human-readable report.
pub fn render_summary(summaries: &[ExchangeSummary]) -> String {
    let rule = request_separator();
    let mut out = String::new();
    let _ = writeln!(out, "{rule}\nAirPrint Proxy Transcript Summary\n{rule}\n");

    for s in summaries {
        let _ = writeln!(out, "Request #{}", s.index);
        let _ = writeln!(out, "  Time:           {}", s.timestamp);
        let _ = writeln!(out, "  Client:         {} (MAC: {})", s.client_ip, s.client_mac);
        let _ = writeln!(out, "  Method:         {} {}", s.method, s.path);
        let _ = writeln!(
            out,
            "  Content-Type:   {}",
            s.content_type.as_deref().unwrap_or("Unknown")
        );
        let _ = writeln!(
            out,
            "  Content-Length: {} bytes",
            s.content_length.unwrap_or(0)
        );
        match &s.response {
            Some(r) => {
                let _ = writeln!(out, "  Response:       {} {}", r.status, r.reason);
                if let Some(len) = r.content_length {
                    let _ = writeln!(out, "  Response Size:  {len} bytes");
                }
            }
            None => {
                let _ = writeln!(out, "  Response:       none recorded");
            }
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{rule}\nTotal Requests: {}\n{rule}", summaries.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{CapturedRequest, CapturedResponse};
    use crate::identity::ClientIdentity;
    use crate::transcript::dump::{request_block, response_block};
    use bytes::Bytes;
    use chrono::Local;
    use http::{header, HeaderMap, HeaderValue, Method, StatusCode, Version};

    fn request(path: &str, body: &'static [u8]) -> CapturedRequest {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/ipp"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        CapturedRequest {
            method: Method::POST,
            uri: path.parse().unwrap(),
            version: Version::HTTP_11,
            headers,
            body: Bytes::from_static(body),
        }
    }

    fn response(status: StatusCode, body: &'static [u8]) -> CapturedResponse {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        CapturedResponse {
            status,
            version: Version::HTTP_11,
            headers,
            body: Bytes::from_static(body),
        }
    }

    fn transcript(blocks: Vec<Vec<u8>>) -> String {
        String::from_utf8_lossy(&blocks.concat()).into_owned()
    }

    #[test]
    fn test_parse_single_exchange() {
        let identity = ClientIdentity {
            network_address: "192.168.1.10".into(),
            hardware_address: "00:11:22:33:44:55".into(),
        };
        let text = transcript(vec![
            request_block(&request("/ipp/print", b"\x02\x00\x00\x0b"), &identity, Local::now()),
            response_block(&response(StatusCode::OK, b"OK"), Local::now()),
        ]);

        let summaries = parse_transcript(&text);
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.index, 1);
        assert_eq!(s.client_ip, "192.168.1.10");
        assert_eq!(s.client_mac, "00:11:22:33:44:55");
        assert_eq!(s.method, "POST");
        assert_eq!(s.path, "/ipp/print");
        assert_eq!(s.content_type.as_deref(), Some("application/ipp"));
        assert_eq!(s.content_length, Some(4));

        let r = s.response.as_ref().unwrap();
        assert_eq!(r.status, 200);
        assert_eq!(r.reason, "OK");
        assert_eq!(r.content_length, Some(2));
    }

    #[test]
    fn test_responses_pair_fifo() {
        let a = ClientIdentity::unresolved("10.0.0.1");
        let b = ClientIdentity::unresolved("10.0.0.2");
        let text = transcript(vec![
            request_block(&request("/a", b"1"), &a, Local::now()),
            request_block(&request("/b", b"2"), &b, Local::now()),
            response_block(&response(StatusCode::OK, b"first"), Local::now()),
            response_block(&response(StatusCode::NOT_FOUND, b""), Local::now()),
        ]);

        let summaries = parse_transcript(&text);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].path, "/a");
        assert_eq!(summaries[0].response.as_ref().unwrap().status, 200);
        assert_eq!(summaries[1].path, "/b");
        assert_eq!(summaries[1].response.as_ref().unwrap().status, 404);
        assert_eq!(summaries[1].client_mac, "unknown");
    }

    #[test]
    fn test_body_text_is_not_mistaken_for_a_block() {
        let identity = ClientIdentity::unresolved("10.0.0.1");
        let text = transcript(vec![request_block(
            &request("/ipp/print", b"\nREQUEST at now\nRESPONSE at now\n"),
            &identity,
            Local::now(),
        )]);

        let summaries = parse_transcript(&text);
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].response.is_none());
    }

    #[test]
    fn test_render_summary() {
        let identity = ClientIdentity::unresolved("10.0.0.1");
        let text = transcript(vec![request_block(
            &request("/ipp/print", b"x"),
            &identity,
            Local::now(),
        )]);
        let report = render_summary(&parse_transcript(&text));
        assert!(report.contains("Request #1"));
        assert!(report.contains("Method:         POST /ipp/print"));
        assert!(report.contains("Response:       none recorded"));
        assert!(report.contains("Total Requests: 1"));
    }

    #[test]
    fn test_empty_transcript() {
        assert!(parse_transcript("").is_empty());
        assert!(render_summary(&[]).contains("Total Requests: 0"));
    }
}
