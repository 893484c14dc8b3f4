//! Tests against a real TCP listener.
//!
//! The router tests in `push_tests.rs` cover protocol behavior; these
//! verify the bound server itself: liveness probing and a push driven over
//! an actual HTTP connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::http::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use layergrab_shim::{ExportLayout, LayoutWriter, SessionContext, ShimServer};
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpStream;

async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Vec<u8>,
) -> std::io::Result<(StatusCode, Bytes)> {
    let stream = TcpStream::connect(addr).await?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(std::io::Error::other)?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = Request::builder()
        .method(method)
        .uri(path)
        .header(hyper::header::HOST, addr.to_string())
        .body(Full::new(Bytes::from(body)))
        .expect("failed to build request");

    let response = sender
        .send_request(request)
        .await
        .map_err(std::io::Error::other)?;
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .map_err(std::io::Error::other)?
        .to_bytes();
    Ok((status, bytes))
}

async fn start_shim(tmp: &TempDir) -> (SocketAddr, Arc<SessionContext>, Arc<dyn LayoutWriter>) {
    let session = Arc::new(SessionContext::new());
    let layout: Arc<dyn LayoutWriter> = Arc::new(ExportLayout::new(tmp.path()));

    let server = ShimServer::bind(Arc::clone(&session), Arc::clone(&layout))
        .await
        .expect("Failed to bind shim");
    let addr = server.local_addr();
    tokio::spawn(server.run());

    (addr, session, layout)
}

#[tokio::test]
async fn test_ping_fails_without_listener_and_succeeds_once_bound() {
    // Reserve a port, then free it: probing it must fail to connect.
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    assert!(http_request(dead_addr, "GET", "/v1/_ping", Vec::new())
        .await
        .is_err());

    // Once bound, a single probe attempt succeeds.
    let tmp = TempDir::new().unwrap();
    let (addr, _session, _layout) = start_shim(&tmp).await;

    let (status, body) = http_request(addr, "GET", "/v1/_ping", Vec::new())
        .await
        .expect("probe failed against bound shim");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"true");
}

#[tokio::test]
async fn test_push_over_tcp_persists_layer() {
    let tmp = TempDir::new().unwrap();
    let (addr, session, layout) = start_shim(&tmp).await;

    let id = "feedface0001";
    session.bind_layer_id(id).unwrap();
    layout.prepare(id).unwrap();

    let metadata = br#"{"id":"feedface0001"}"#.to_vec();
    let blob: Vec<u8> = (0..256 * 1024).map(|i| (i % 199) as u8).collect();

    let (status, _) = http_request(addr, "PUT", "/v1/repositories/staging/", b"[]".to_vec())
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, _) = http_request(
        addr,
        "PUT",
        &format!("/v1/images/{id}/json"),
        metadata.clone(),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, _) = http_request(addr, "PUT", &format!("/v1/images/{id}/layer"), blob.clone())
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, _) = http_request(
        addr,
        "PUT",
        "/v1/repositories/staging/images",
        Vec::new(),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let dir = tmp.path().join(id);
    assert_eq!(fs::read(dir.join("json")).unwrap(), metadata);
    assert_eq!(fs::read(dir.join("layer.tar")).unwrap(), blob);
    assert_eq!(fs::read_to_string(dir.join("VERSION")).unwrap(), "1.0");
}
