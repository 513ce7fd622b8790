mod common;

use bytes::Bytes;
use common::{closed_addr, get, send, spawn_backend, start_proxy, ProxyOptions};
use http::{header, Method, StatusCode};
use std::time::Duration;
use warp::Filter;

fn ipp_payload() -> Vec<u8> {
    // IPP header followed by every byte value, repeated past a typical buffer size.
    let mut payload = vec![0x02, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x2a];
    payload.extend((0..=255u8).cycle().take(128 * 1024));
    payload
}

#[tokio::test]
async fn test_get_is_forwarded_to_backend() {
    let backend = spawn_backend(warp::path!("ipp" / "print").map(|| "OK").boxed());
    let proxy = start_proxy(&backend.to_string(), ProxyOptions::default()).await;

    let (status, body) = get(proxy.addr, "/ipp/print").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"OK"));

    proxy.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_body_round_trip_is_transparent_with_and_without_transcript() {
    let echo = warp::post()
        .and(warp::body::bytes())
        .map(|body: warp::hyper::body::Bytes| body.to_vec())
        .boxed();
    let backend = spawn_backend(echo);
    let payload = ipp_payload();

    for debug in [false, true] {
        let proxy = start_proxy(
            &backend.to_string(),
            ProxyOptions {
                debug,
                ..Default::default()
            },
        )
        .await;

        let (status, _, body) = send(proxy.addr, Method::POST, "/ipp/print", payload.clone())
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), payload.as_slice(), "debug={debug}");

        assert_eq!(proxy.transcript_path().is_some(), debug);
        proxy.server.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_host_and_forwarded_headers_are_rewritten() {
    let echo_headers = warp::header::<String>("host")
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .and(warp::header::optional::<String>("content-type"))
        .map(|host: String, xff: Option<String>, content_type: Option<String>| {
            format!(
                "{host}|{}|{}",
                xff.unwrap_or_default(),
                content_type.unwrap_or_default()
            )
        })
        .boxed();
    let backend = spawn_backend(echo_headers);
    let proxy = start_proxy(&backend.to_string(), ProxyOptions::default()).await;

    let (status, _, body) = send(proxy.addr, Method::POST, "/ipp/print", "x")
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        String::from_utf8(body.to_vec()).unwrap(),
        format!("{backend}|127.0.0.1|application/ipp")
    );

    proxy.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_returns_gateway_error_and_keeps_serving() {
    let proxy = start_proxy(&closed_addr().to_string(), ProxyOptions::default()).await;

    for _ in 0..3 {
        let (status, _) = get(proxy.addr, "/ipp/print").await.unwrap();
        assert!(
            status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT,
            "unexpected status {status}"
        );
    }
    assert_eq!(
        proxy.server.state().await,
        airprint_proxy::server::ServerState::Running
    );

    proxy.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let slow = warp::any()
        .then(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            "late"
        })
        .boxed();
    let backend = spawn_backend(slow);
    let proxy = start_proxy(
        &backend.to_string(),
        ProxyOptions {
            request_timeout_ms: Some(200),
            ..Default::default()
        },
    )
    .await;

    let (status, body) = get(proxy.addr, "/ipp/print").await.unwrap();
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, Bytes::from_static(b"Gateway Timeout"));

    proxy.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_redirects_are_relayed_not_followed() {
    let redirect = warp::any()
        .map(|| warp::redirect::found(warp::http::Uri::from_static("/ipp/elsewhere")))
        .boxed();
    let backend = spawn_backend(redirect);
    let proxy = start_proxy(&backend.to_string(), ProxyOptions::default()).await;

    let (status, headers, _) = send(proxy.addr, Method::GET, "/ipp/print", Bytes::new())
        .await
        .unwrap();
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "/ipp/elsewhere");

    proxy.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transcript_records_client_identity() {
    let backend = spawn_backend(warp::any().map(|| "OK").boxed());
    let proxy = start_proxy(
        &backend.to_string(),
        ProxyOptions {
            debug: true,
            ..Default::default()
        },
    )
    .await;

    let (status, _) = get(proxy.addr, "/ipp/print?attrs=all").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    proxy.server.shutdown().await.unwrap();

    let path = proxy.transcript_path().unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("airprint-debug-") && name.ends_with(".log"));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains(&format!("Client IP: 127.0.0.1 | MAC: {}", common::CLIENT_MAC)));
    assert!(text.contains("GET /ipp/print?attrs=all HTTP/1.1\r\n"));
    assert!(text.contains("HTTP/1.1 200 OK\r\n"));
    assert!(text.find("REQUEST at ").unwrap() < text.find("RESPONSE at ").unwrap());
}
