//! Shim registry server.

use crate::api::{create_router, AppState};
use crate::error::{Result, ShimError};
use crate::layout::LayoutWriter;
use crate::session::SessionContext;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::Service;
use tower_http::trace::TraceLayer;

/// Shim registry bound to an ephemeral loopback port.
///
/// Binding and serving are split so the orchestrator can learn the port
/// (and tag the image with it) before the accept loop starts.
pub struct ShimServer {
    listener: TcpListener,
    router: Router,
    addr: SocketAddr,
}

impl ShimServer {
    /// Binds `127.0.0.1:0` and wires up the router.
    ///
    /// # Errors
    ///
    /// Returns `ShimError::Startup` if the port cannot be bound.
    pub async fn bind(
        session: Arc<SessionContext>,
        layout: Arc<dyn LayoutWriter>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| ShimError::Startup(format!("cannot bind loopback port: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ShimError::Startup(format!("cannot resolve bound address: {e}")))?;

        let state = AppState {
            session,
            layout,
            endpoint: addr.to_string(),
        };
        let router = create_router(state).layer(TraceLayer::new_for_http());

        Ok(Self {
            listener,
            router,
            addr,
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the accept loop until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting a connection fails.
    pub async fn run(self) -> Result<()> {
        tracing::debug!("shim registry listening on {}", self.addr);

        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .map_err(|e| ShimError::Startup(format!("accept failed: {e}")))?;

            let tower_service = self.router.clone();
            tokio::spawn(async move {
                let hyper_service =
                    hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        tower_service.clone().call(request)
                    });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), hyper_service)
                    .await
                {
                    let err_str = err.to_string().to_lowercase();
                    if !err_str.contains("shutting down")
                        && !err_str.contains("connection reset")
                        && !err_str.contains("broken pipe")
                    {
                        tracing::error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }
}
