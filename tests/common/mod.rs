#![allow(dead_code)]

use airprint_proxy::config::ProxyConfig;
use airprint_proxy::identity::{FileBased, IdentityResolver};
use airprint_proxy::proxy::AirPrintProxy;
use airprint_proxy::server::ProxyServer;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use warp::filters::BoxedFilter;
use warp::Reply;

/// Hardware address the test neighbor table reports for 127.0.0.1.
pub const CLIENT_MAC: &str = "02:42:ac:11:00:02";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct ProxyOptions {
    pub debug: bool,
    pub shutdown_grace_secs: u64,
    pub request_timeout_ms: Option<u64>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            debug: false,
            shutdown_grace_secs: 5,
            request_timeout_ms: None,
        }
    }
}

pub struct TestProxy {
    pub server: Arc<ProxyServer>,
    pub addr: SocketAddr,
    pub dir: TempDir,
}

impl TestProxy {
    pub fn transcript_path(&self) -> Option<PathBuf> {
        self.server.transcript().path().map(Path::to_path_buf)
    }
}

/// Serve `routes` on an ephemeral loopback port.
pub fn spawn_backend<T: Reply + 'static>(routes: BoxedFilter<(T,)>) -> SocketAddr {
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

/// A loopback address with nothing listening on it.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub async fn start_proxy(target: &str, options: ProxyOptions) -> TestProxy {
    let dir = tempfile::tempdir().unwrap();

    let table = dir.path().join("arp");
    std::fs::write(
        &table,
        format!(
            "IP address       HW type     Flags       HW address            Mask     Device\n\
             127.0.0.1        0x1         0x2         {CLIENT_MAC}     *        lo\n"
        ),
    )
    .unwrap();

    let mut config = ProxyConfig::new(target);
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.debug = options.debug;
    config.transcript_dir = dir.path().join("transcripts");
    config.shutdown_grace_secs = options.shutdown_grace_secs;
    config.request_timeout_ms = options.request_timeout_ms;

    let proxy = AirPrintProxy::new(&config)
        .await
        .unwrap()
        .with_resolver(IdentityResolver::with_lookup(Arc::new(FileBased::new(table))));
    let server = Arc::new(ProxyServer::from_parts(config, proxy));
    let addr = server.start().await.unwrap();

    TestProxy { server, addr, dir }
}

pub fn client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

pub async fn send(
    addr: SocketAddr,
    method: Method,
    path: &str,
    body: impl Into<Bytes>,
) -> Result<(StatusCode, HeaderMap, Bytes), BoxError> {
    let request = Request::builder()
        .method(method)
        .uri(format!("http://{addr}{path}"))
        .header(http::header::CONTENT_TYPE, "application/ipp")
        .body(Full::new(body.into()))?;

    let response = client().request(request).await?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok((parts.status, parts.headers, body))
}

pub async fn get(addr: SocketAddr, path: &str) -> Result<(StatusCode, Bytes), BoxError> {
    let (status, _, body) = send(addr, Method::GET, path, Bytes::new()).await?;
    Ok((status, body))
}
