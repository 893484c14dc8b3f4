//! # layergrab-shim
//!
//! Shim registry that captures a single `docker push` onto local disk.
//!
//! The shim binds an ephemeral loopback port and implements just enough of
//! the Registry v1 push surface that an unmodified daemon, told to push an
//! image tagged `127.0.0.1:<port>/...`, believes it is talking to a real
//! registry. The pushed artifacts (layer metadata, blob bytes, checksum)
//! are written to `outdir/<layer id>/` instead of going over the wire.
//!
//! ## Architecture
//!
//! ```text
//! docker daemon ──► 127.0.0.1:<port> ──► axum router ──► push state machine
//!                                                             │
//!                                                             ▼
//!                                                      layout writer
//!                                                  (export | registry)
//! ```
//!
//! The orchestrator (the `layergrab` binary) owns the control flow: it
//! resolves the layer identifier, binds it into the [`SessionContext`],
//! prepares the output directory, and only then triggers the push.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod error;
pub mod handlers;
pub mod layout;
pub mod server;
pub mod session;

pub use api::{create_router, AppState};
pub use error::{Result, ShimError};
pub use layout::{ExportLayout, LayoutWriter, RegistryLayout, EXPORT_VERSION};
pub use server::ShimServer;
pub use session::{PushEvent, PushSession, PushState, SessionContext};

/// Liveness probe path served by the shim.
pub const PING_PATH: &str = "/v1/_ping";
