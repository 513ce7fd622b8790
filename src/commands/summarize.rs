use std::path::Path;

use crate::error::Result;
use crate::transcript::summary::{parse_transcript, render_summary, ExchangeSummary};

/// Read a transcript file. Bodies may be binary, so invalid UTF-8 is replaced.
pub async fn summarize_file(path: &Path) -> Result<Vec<ExchangeSummary>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(parse_transcript(&String::from_utf8_lossy(&bytes)))
}

pub async fn run_summarize(path: &Path, json: bool) -> Result<()> {
    let summaries = summarize_file(path).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print!("{}", render_summary(&summaries));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::exchange::{CapturedRequest, CapturedResponse};
    use crate::identity::ClientIdentity;
    use crate::transcript::TranscriptSession;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode, Version};

    #[tokio::test]
    async fn test_summarize_written_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let session = TranscriptSession::create(dir.path()).await.unwrap();
        let request = CapturedRequest {
            method: Method::POST,
            uri: "/ipp/print".parse().unwrap(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            // Non-UTF-8 IPP bytes.
            body: Bytes::from_static(b"\x02\x00\x00\x0b\xff\xfe"),
        };
        let response = CapturedResponse {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"\x02\x00\x00\x00"),
        };
        session
            .log_request(&request, &ClientIdentity::unresolved("10.0.0.7"))
            .await
            .unwrap();
        session.log_response(&response).await.unwrap();
        session.close().await.unwrap();

        let summaries = summarize_file(session.path().unwrap()).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].client_ip, "10.0.0.7");
        assert_eq!(summaries[0].response.as_ref().unwrap().status, 200);

        run_summarize(session.path().unwrap(), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_transcript_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = summarize_file(&dir.path().join("missing.log"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Io(_)));
    }
}
