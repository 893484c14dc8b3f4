//! Export orchestration.
//!
//! Drives the daemon through one push against the local shim: resolve the
//! layer identifier, prepare the output directory, bring the shim up, tag
//! the layer at the shim's address, push, then untag.

use crate::client::{probe_http, DaemonClient};
use crate::commands::Cli;
use anyhow::{bail, Context, Result};
use layergrab_shim::{
    ExportLayout, LayoutWriter, RegistryLayout, SessionContext, ShimServer, PING_PATH,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};

/// Probe back-off sequence; the shim must answer within this budget.
const PROBE_SLEEPS_MS: [u64; 8] = [1, 5, 10, 100, 200, 500, 1000, 2000];

/// Repository name the push is staged under (prefixed with the shim address).
const STAGING_REPO: &str = "layergrab-push-staging-tmp";

/// Second, nicer-looking tag left on the layer so removing the staging tag
/// cannot prune it.
const EXPORT_REPO: &str = "layergrab-tmp";

/// Executes the export.
pub async fn execute(args: Cli) -> Result<()> {
    // Signals terminate the whole tool immediately; in-flight writes are
    // abandoned rather than cleaned up.
    tokio::spawn(async {
        shutdown_signal().await;
        debug!("received shutdown signal, exiting");
        std::process::exit(1);
    });

    let client = DaemonClient::from_env()?;

    let inspect = client
        .inspect_image(&args.layer)
        .await
        .context("failed to resolve layer reference")?;
    let layer_id = inspect
        .id
        .strip_prefix("sha256:")
        .unwrap_or(&inspect.id)
        .to_string();
    if layer_id != args.layer {
        info!("Full layer id found: {}", layer_id);
    }

    let session = Arc::new(SessionContext::new());
    session.bind_layer_id(&layer_id)?;

    info!("Layer folder will be dumped into {}", args.outdir.display());
    let layout: Arc<dyn LayoutWriter> = if args.registry_format {
        Arc::new(RegistryLayout::new(&args.outdir))
    } else {
        Arc::new(ExportLayout::new(&args.outdir))
    };
    layout
        .prepare(&layer_id)
        .context("failed to create output directory")?;

    let server = ShimServer::bind(Arc::clone(&session), Arc::clone(&layout))
        .await
        .context("failed to start shim registry")?;
    let addr = server.local_addr();
    debug!("Starting shim registry on {}", addr);
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    });

    wait_for_shim(addr).await?;
    debug!("Shim registry started");

    let staging_repo = format!("{addr}/{STAGING_REPO}");

    debug!("Tagging layer into temporary repos");
    client
        .tag_image(&layer_id, &staging_repo, "latest")
        .await
        .context("failed to tag staging repo")?;
    client
        .tag_image(&layer_id, EXPORT_REPO, "latest")
        .await
        .context("failed to tag export repo")?;

    debug!("Pushing image");
    client
        .push_image(&staging_repo, "latest")
        .await
        .context("push did not complete")?;

    debug!("Removing staging tag");
    client
        .remove_image(&format!("{staging_repo}:latest"))
        .await
        .context("failed to remove staging tag")?;
    if args.clean {
        debug!("Removing export tag");
        client
            .remove_image(&format!("{EXPORT_REPO}:latest"))
            .await
            .context("failed to remove export tag")?;
    }

    info!("Export complete");
    Ok(())
}

/// Polls the shim's ping endpoint with a bounded back-off sequence.
///
/// This is a hard startup timeout: if the sequence is exhausted without a
/// successful probe, the whole run fails.
async fn wait_for_shim(addr: SocketAddr) -> Result<()> {
    debug!("Waiting for shim registry to answer on {}", addr);
    for ms in PROBE_SLEEPS_MS {
        debug!("Sleeping {} ms before ping", ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        if probe_http(addr, PING_PATH).await.is_ok() {
            return Ok(());
        }
    }
    bail!("shim registry took too long to come up");
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
