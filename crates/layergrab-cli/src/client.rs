//! Docker daemon client.
//!
//! Minimal HTTP client for the Engine API operations the export flow
//! needs: inspect, tag, push, untag. Connects per request over the Unix
//! socket or TCP endpoint named by `DOCKER_HOST`.

use anyhow::{bail, Context, Result};
use base64::prelude::{Engine, BASE64_STANDARD};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

/// Default socket path for the docker daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// How the daemon is reached.
#[derive(Debug, Clone)]
enum Transport {
    Unix(PathBuf),
    Tcp(String),
}

/// Image inspect response (only the field the export flow needs).
#[derive(Debug, Deserialize)]
pub struct ImageInspect {
    /// Canonical image/layer identifier.
    #[serde(rename = "Id")]
    pub id: String,
}

/// Client for the daemon's Engine API.
pub struct DaemonClient {
    transport: Transport,
}

impl DaemonClient {
    /// Creates a client from the `DOCKER_HOST` environment variable,
    /// defaulting to the standard Unix socket.
    pub fn from_env() -> Result<Self> {
        match std::env::var("DOCKER_HOST") {
            Ok(host) if !host.is_empty() => Self::from_host(&host),
            _ => Ok(Self {
                transport: Transport::Unix(PathBuf::from(DEFAULT_SOCKET_PATH)),
            }),
        }
    }

    /// Creates a client from a `DOCKER_HOST`-style endpoint string.
    pub fn from_host(host: &str) -> Result<Self> {
        let transport = if let Some(path) = host.strip_prefix("unix://") {
            Transport::Unix(PathBuf::from(path))
        } else if let Some(addr) = host.strip_prefix("tcp://") {
            Transport::Tcp(addr.to_string())
        } else {
            bail!("unsupported DOCKER_HOST '{host}': expected unix:// or tcp://");
        };
        Ok(Self { transport })
    }

    /// Creates a client for a specific Unix socket path.
    pub fn with_socket(path: impl AsRef<Path>) -> Self {
        Self {
            transport: Transport::Unix(path.as_ref().to_path_buf()),
        }
    }

    /// Pings the daemon.
    pub async fn ping(&self) -> Result<()> {
        self.request(Method::GET, "/_ping", Vec::new()).await?;
        Ok(())
    }

    /// Resolves an image reference to its canonical identifier.
    pub async fn inspect_image(&self, reference: &str) -> Result<ImageInspect> {
        let body = self
            .request(Method::GET, &format!("/images/{reference}/json"), Vec::new())
            .await?;
        serde_json::from_slice(&body).context("failed to parse image inspect response")
    }

    /// Tags an image into a repository.
    pub async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<()> {
        let path = format!("/images/{source}/tag?repo={repo}&tag={tag}&force=1");
        self.request(Method::POST, &path, Vec::new()).await?;
        Ok(())
    }

    /// Pushes an image and scans the NDJSON progress stream for failures.
    ///
    /// The daemon answers 200 before the push has finished; errors arrive
    /// as `{"error": ...}` lines inside the stream.
    pub async fn push_image(&self, name: &str, tag: &str) -> Result<()> {
        let auth = BASE64_STANDARD.encode("{}");
        let path = format!("/images/{name}/push?tag={tag}");
        let body = self
            .request(Method::POST, &path, vec![("X-Registry-Auth", auth)])
            .await?;

        for line in String::from_utf8_lossy(&body)
            .lines()
            .filter(|l| !l.is_empty())
        {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(line) {
                if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
                    bail!("push failed: {error}");
                }
                if let Some(status) = json.get("status").and_then(|s| s.as_str()) {
                    tracing::debug!("{}", status);
                }
            }
        }
        Ok(())
    }

    /// Removes an image tag without pruning parent layers.
    pub async fn remove_image(&self, reference: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            &format!("/images/{reference}?noprune=1"),
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: Vec<(&'static str, String)>,
    ) -> Result<Bytes> {
        match &self.transport {
            Transport::Unix(socket_path) => {
                let stream = UnixStream::connect(socket_path).await.with_context(|| {
                    format!("failed to connect to daemon at {}", socket_path.display())
                })?;
                send_request(stream, method, path, headers).await
            }
            Transport::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .with_context(|| format!("failed to connect to daemon at {addr}"))?;
                send_request(stream, method, path, headers).await
            }
        }
    }
}

/// Sends one HTTP/1.1 request over an established stream.
async fn send_request<S>(
    stream: S,
    method: Method,
    path: &str,
    headers: Vec<(&'static str, String)>,
) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("HTTP handshake failed")?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("Connection closed: {}", e);
        }
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(format!("http://localhost{path}"))
        .header("Host", "localhost");
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    let request = builder
        .body(Full::new(Bytes::new()))
        .context("failed to build request")?;

    let response = sender
        .send_request(request)
        .await
        .context("failed to send request")?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .context("failed to read response")?
        .to_bytes();

    if !status.is_success() {
        let message = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());
        bail!("daemon returned error {status}: {message}");
    }

    Ok(body)
}

/// Probes an HTTP endpoint over TCP; succeeds once it answers 2xx.
pub async fn probe_http(addr: SocketAddr, path: &str) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    send_request(stream, Method::GET, path, Vec::new()).await?;
    Ok(())
}
