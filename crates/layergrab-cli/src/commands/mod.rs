//! CLI definition and command implementations.

use clap::Parser;
use std::path::PathBuf;

pub mod grab;

/// Export a single image layer by capturing a docker push locally
#[derive(Parser)]
#[command(name = "layergrab")]
#[command(author, version, about, long_about = None)]
#[command(
    after_help = "The DOCKER_HOST environment variable overrides the default location of the docker daemon"
)]
pub struct Cli {
    /// Layer id to export, or image name to export the top layer of
    pub layer: String,

    /// Directory to write the layer to
    #[arg(short = 'o', long, default_value = ".")]
    pub outdir: PathBuf,

    /// Remove the temporary tag after use
    ///
    /// WARNING: can trigger layer deletion if run on a layer with no
    /// children or other references.
    #[arg(long)]
    pub clean: bool,

    /// Output in the format a registry would use, rather than for an image export
    #[arg(long)]
    pub registry_format: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}
