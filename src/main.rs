use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datablob::{
    Connection, DatasetBlob, DownloadOptions, PathComponents, RemoteCommit, config::Configuration,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Opt {
    /// Extra configuration files, applied in order after the per-user one.
    #[clap(short, long, value_parser)]
    pub config: Vec<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the components of a dataset version.
    Describe {
        /// JSON file of the form `{"components": [...]}`.
        blob: PathBuf,
    },
    /// Download one component of a versioned dataset blob.
    Download {
        #[clap(long)]
        repository_id: String,
        #[clap(long)]
        commit: String,
        /// Location of the blob in the commit, `/` separated.
        #[clap(long)]
        blob_path: String,
        /// Component listing, needed for checksum verification.
        #[clap(long)]
        blob: Option<PathBuf>,
        #[clap(long)]
        verify_checksums: bool,
        component: String,
        destination: PathBuf,
    },
}

fn read_components(path: &Path) -> Result<PathComponents> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let options = Opt::parse();

    match options.command {
        Command::Describe { blob } => {
            let blob = DatasetBlob::new(read_components(&blob)?);
            println!("{blob}");
        }
        Command::Download {
            repository_id,
            commit,
            blob_path,
            blob,
            verify_checksums,
            component,
            destination,
        } => {
            let config = Configuration::load(options.config)?;
            let connection = Connection::from_config(&config)?;
            let commit = Arc::new(RemoteCommit::new(connection, repository_id, commit));

            let source = match blob {
                Some(path) => read_components(&path)?,
                None => PathComponents::default(),
            };
            let mut blob = DatasetBlob::new(source);
            blob.bind(&commit, blob_path);

            let options = DownloadOptions {
                verify_checksums: verify_checksums || config.verify_checksums,
            };
            let downloaded = blob
                .download_with(&component, &destination, options)
                .await
                .with_context(|| format!("Failed to download {component}"))?;

            println!("download complete ({})", downloaded.destination.display());
        }
    }

    Ok(())
}
