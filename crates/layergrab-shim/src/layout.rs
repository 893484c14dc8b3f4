//! On-disk layout writers.
//!
//! Two interchangeable layouts, selected once at startup. Both persist the
//! same three artifacts for a layer identifier; they differ only in file
//! names and whether a fixed-content version marker is emitted:
//!
//! ```text
//! <outdir>/<layer id>/          # export layout
//! ├── VERSION                   # fixed "1.0"
//! ├── json                      # layer metadata as sent by the daemon
//! └── layer.tar                 # raw blob bytes
//!
//! <outdir>/<layer id>/          # registry layout
//! ├── json
//! ├── layer
//! └── checksum
//! ```
//!
//! The push state machine stays ignorant of these names; handlers only talk
//! to the [`LayoutWriter`] trait.

use crate::error::{Result, ShimError};
use async_trait::async_trait;
use axum::body::Body;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Content of the `VERSION` marker in export layout.
pub const EXPORT_VERSION: &str = "1.0";

/// Writer for one layer's on-disk artifacts.
#[async_trait]
pub trait LayoutWriter: Send + Sync {
    /// Directory holding the identifier's artifacts.
    fn layer_dir(&self, id: &str) -> PathBuf;

    /// Creates the identifier directory before the push starts.
    ///
    /// Fails loudly if the directory already exists, so a prior run's
    /// output is never clobbered. The export layout also emits the
    /// `VERSION` marker here.
    ///
    /// # Errors
    ///
    /// Returns `ShimError::Startup` on collision or creation failure.
    fn prepare(&self, id: &str) -> Result<()>;

    /// Creates the identifier directory if a pipelined request arrives
    /// before `prepare` ran for that identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn ensure_prepared(&self, id: &str) -> Result<()>;

    /// Writes the layer metadata artifact.
    ///
    /// # Errors
    ///
    /// Returns an error on write failure.
    fn write_metadata(&self, id: &str, bytes: &[u8]) -> Result<()>;

    /// Reads back the persisted metadata, if present.
    ///
    /// # Errors
    ///
    /// Returns an error on read failure.
    fn read_metadata(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Streams the blob body to the blob artifact, hashing as bytes arrive.
    ///
    /// Returns the `sha256:<hex>` digest of the written bytes. The file is
    /// flushed and synced before returning so a short write cannot be
    /// mistaken for success.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read or the file written.
    async fn write_blob(&self, id: &str, body: Body) -> Result<String>;

    /// Records the checksum artifact.
    ///
    /// The export layout has no checksum file and treats this as a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error on write failure.
    fn write_checksum(&self, id: &str, checksum: &str) -> Result<()>;

    /// Whether this layout stores the checksum as its own artifact file.
    fn stores_checksum(&self) -> bool;
}

/// Export layout: artifacts reassemble into a loadable image tarball.
pub struct ExportLayout {
    out_dir: PathBuf,
}

impl ExportLayout {
    /// Creates an export layout rooted at `out_dir`.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait]
impl LayoutWriter for ExportLayout {
    fn layer_dir(&self, id: &str) -> PathBuf {
        self.out_dir.join(id)
    }

    fn prepare(&self, id: &str) -> Result<()> {
        let dir = self.layer_dir(id);
        create_layer_dir(&dir)?;
        fs::write(dir.join("VERSION"), EXPORT_VERSION)?;
        Ok(())
    }

    fn ensure_prepared(&self, id: &str) -> Result<()> {
        let dir = self.layer_dir(id);
        if !dir.is_dir() {
            create_layer_dir(&dir)?;
            fs::write(dir.join("VERSION"), EXPORT_VERSION)?;
        }
        Ok(())
    }

    fn write_metadata(&self, id: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.layer_dir(id).join("json"), bytes)?;
        Ok(())
    }

    fn read_metadata(&self, id: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.layer_dir(id).join("json"))
    }

    async fn write_blob(&self, id: &str, body: Body) -> Result<String> {
        stream_to_file(&self.layer_dir(id).join("layer.tar"), body).await
    }

    fn write_checksum(&self, _id: &str, _checksum: &str) -> Result<()> {
        Ok(())
    }

    fn stores_checksum(&self) -> bool {
        false
    }
}

/// Registry layout: raw blob/metadata/checksum files as a registry stores them.
pub struct RegistryLayout {
    out_dir: PathBuf,
}

impl RegistryLayout {
    /// Creates a registry layout rooted at `out_dir`.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait]
impl LayoutWriter for RegistryLayout {
    fn layer_dir(&self, id: &str) -> PathBuf {
        self.out_dir.join(id)
    }

    fn prepare(&self, id: &str) -> Result<()> {
        create_layer_dir(&self.layer_dir(id))
    }

    fn ensure_prepared(&self, id: &str) -> Result<()> {
        let dir = self.layer_dir(id);
        if !dir.is_dir() {
            create_layer_dir(&dir)?;
        }
        Ok(())
    }

    fn write_metadata(&self, id: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.layer_dir(id).join("json"), bytes)?;
        Ok(())
    }

    fn read_metadata(&self, id: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.layer_dir(id).join("json"))
    }

    async fn write_blob(&self, id: &str, body: Body) -> Result<String> {
        stream_to_file(&self.layer_dir(id).join("layer"), body).await
    }

    fn write_checksum(&self, id: &str, checksum: &str) -> Result<()> {
        fs::write(self.layer_dir(id).join("checksum"), checksum)?;
        Ok(())
    }

    fn stores_checksum(&self) -> bool {
        true
    }
}

fn create_layer_dir(dir: &Path) -> Result<()> {
    fs::create_dir(dir).map_err(|e| {
        ShimError::Startup(format!(
            "cannot create layer directory {}: {}",
            dir.display(),
            e
        ))
    })
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Streams a request body into `path`, returning its `sha256:<hex>` digest.
async fn stream_to_file(path: &Path, body: Body) -> Result<String> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ShimError::InvalidRequest(format!("unreadable body: {e}")))?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Consumes a request body without persisting it, returning its digest.
///
/// Used to verify a replayed blob against the persisted copy without
/// touching the artifact on disk.
pub async fn digest_body(body: Body) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ShimError::InvalidRequest(format!("unreadable body: {e}")))?;
        hasher.update(&chunk);
    }

    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
