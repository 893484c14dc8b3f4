//! Export session state.
//!
//! Two pieces of cross-request state live here:
//!
//! - the single layer identifier under export, bound exactly once by the
//!   orchestrator before the daemon is told to push, and read by handlers
//!   under a lock (tag resolution, directory creation);
//! - per-identifier [`PushSession`] values tracking how far the push
//!   protocol has progressed for that identifier.
//!
//! The tool only ever exports one layer per run, but nothing here assumes
//! it: sessions are always keyed by identifier, so concurrent pushes of
//! distinct identifiers stay independent.

use crate::error::{Result, ShimError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Push progress for one identifier.
///
/// Transitions are driven by inbound requests from the pushing daemon.
/// `TagAssigned` is external (the orchestrator's tagging step) and has no
/// representation here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// No artifact received yet.
    NotStarted,
    /// Layer metadata JSON stored.
    MetadataReceived,
    /// Layer blob written to disk.
    BlobReceived,
    /// Checksum recorded.
    ChecksumReceived,
    /// All required artifacts durably written.
    Persisted,
}

/// Push-protocol event observed for an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEvent {
    /// Metadata JSON received.
    Metadata,
    /// Blob bytes received.
    Blob,
    /// Checksum received.
    Checksum,
}

impl PushState {
    /// Applies one protocol event.
    ///
    /// Daemons may pipeline requests, so a blob arriving before metadata is
    /// tolerated rather than rejected. `Persisted` is terminal; replayed
    /// events leave it unchanged.
    #[must_use]
    pub fn apply(self, event: PushEvent) -> Self {
        use PushEvent::{Blob, Checksum, Metadata};
        use PushState::{
            BlobReceived, ChecksumReceived, MetadataReceived, NotStarted, Persisted,
        };

        match (self, event) {
            (Persisted, _) => Persisted,
            (_, Checksum) => ChecksumReceived,
            (ChecksumReceived, _) => ChecksumReceived,
            (NotStarted, Metadata) => MetadataReceived,
            // Pipelined blob before metadata, or a blob replay.
            (_, Blob) => BlobReceived,
            (MetadataReceived, Metadata) => MetadataReceived,
            // Late metadata for an already-received blob.
            (BlobReceived, Metadata) => BlobReceived,
        }
    }
}

/// Transient per-push state for one identifier.
#[derive(Debug)]
pub struct PushSession {
    /// Current protocol state.
    pub state: PushState,
    /// Whether metadata has been written.
    pub have_metadata: bool,
    /// Whether the blob has been written.
    pub have_blob: bool,
    /// Whether a checksum has been recorded.
    pub have_checksum: bool,
    /// SHA-256 digest computed while the blob streamed in.
    pub blob_digest: Option<String>,
    /// Checksum supplied by the client, if any.
    pub client_checksum: Option<String>,
}

impl PushSession {
    fn new() -> Self {
        Self {
            state: PushState::NotStarted,
            have_metadata: false,
            have_blob: false,
            have_checksum: false,
            blob_digest: None,
            client_checksum: None,
        }
    }

    /// Records an event and advances the state.
    pub fn advance(&mut self, event: PushEvent) {
        match event {
            PushEvent::Metadata => self.have_metadata = true,
            PushEvent::Blob => self.have_blob = true,
            PushEvent::Checksum => self.have_checksum = true,
        }
        self.state = self.state.apply(event);
    }

    /// Marks the session `Persisted` once every required artifact is on disk.
    ///
    /// `need_checksum` is true for the registry layout, which stores the
    /// checksum as its own artifact file.
    pub fn finalize(&mut self, need_checksum: bool) {
        if self.have_metadata && self.have_blob && (!need_checksum || self.have_checksum) {
            self.state = PushState::Persisted;
        }
    }

    /// Returns the checksum to report to the client: theirs if they sent
    /// one, otherwise the digest computed during blob receipt.
    #[must_use]
    pub fn reported_checksum(&self) -> Option<&str> {
        self.client_checksum
            .as_deref()
            .or(self.blob_digest.as_deref())
    }
}

/// Shared session context injected into every handler.
pub struct SessionContext {
    layer_id: Mutex<Option<String>>,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<PushSession>>>>,
}

impl SessionContext {
    /// Creates an empty context with no identifier bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            layer_id: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Binds the layer identifier under export.
    ///
    /// Called once by the orchestrator before the push is triggered.
    /// Rebinding to the same value is a no-op; rebinding to a different
    /// value is an error.
    ///
    /// # Errors
    ///
    /// Returns `ShimError::IdentifierMismatch` on a conflicting rebind.
    pub fn bind_layer_id(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        let mut guard = self.layer_id.lock().expect("layer id lock poisoned");
        match guard.as_ref() {
            Some(existing) if *existing != id => Err(ShimError::IdentifierMismatch {
                expected: existing.clone(),
                got: id,
            }),
            Some(_) => Ok(()),
            None => {
                *guard = Some(id);
                Ok(())
            }
        }
    }

    /// Returns the bound layer identifier, if any.
    #[must_use]
    pub fn layer_id(&self) -> Option<String> {
        self.layer_id.lock().expect("layer id lock poisoned").clone()
    }

    /// Returns the session for an identifier, creating it on first use.
    ///
    /// The returned lock serializes artifact writes for that identifier;
    /// distinct identifiers proceed concurrently.
    #[must_use]
    pub fn session(&self, id: &str) -> Arc<tokio::sync::Mutex<PushSession>> {
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        Arc::clone(
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(PushSession::new()))),
        )
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
