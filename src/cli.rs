//! `castored`'s command-line surface: `serve` runs the facade and
//! worker pool behind the HTTP gateway; `set-manifest`/`get-manifest`
//! let an operator inspect or seed a bucket's pipeline without going
//! through the API.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "Content-addressed asset processing and storage service")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP gateway and reconciliation worker pool.
    Serve {
        /// Path to a JSON config file; defaults apply for anything absent.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a manifest to a bucket, bypassing the HTTP API.
    SetManifest {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        group: String,
        /// Path to a JSON manifest file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Print a bucket's current manifest as JSON.
    GetManifest {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        group: String,
    },
}
