//! Serve a local gocryptfs-style encrypted tree as a read-only plaintext
//! NFSv3 export.
//!
//! ```bash
//! plainview-nfs --root /mnt/backup/vault --listen 127.0.0.1:11111
//! mount -o nolock,vers=3,tcp,port=11111,mountport=11111 localhost:/ /mnt/plain
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nfsserve::tcp::{NFSTcp, NFSTcpListener};
use plainview_core::backend::FsAccessor;
use plainview_core::pool::PooledBackend;
use plainview_core::tree::{FileTree, DEFAULT_NUM_WORKERS};
use plainview_nfs::{LocalVolume, PlainViewNfs};
use tracing_subscriber::EnvFilter;

/// Read-only plaintext NFS export of an encrypted tree.
#[derive(Parser, Debug)]
#[command(name = "plainview-nfs", version, about)]
struct Args {
    /// Path to the encrypted root (the directory holding gocryptfs.conf).
    #[arg(short, long)]
    root: PathBuf,

    /// Address to serve NFS on.
    #[arg(short, long, default_value = "127.0.0.1:11111")]
    listen: String,

    /// Coalescer worker threads.
    #[arg(short, long, default_value_t = DEFAULT_NUM_WORKERS)]
    workers: usize,

    /// Vault passphrase (prompted when not provided).
    #[arg(short = 'P', long, env = "PLAINVIEW_PASSPHRASE")]
    passphrase: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if !args.root.is_dir() {
        anyhow::bail!("encrypted root is not a directory: {}", args.root.display());
    }
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", args.root.display()))?
        .to_string_lossy()
        .into_owned();

    let passphrase = match args.passphrase {
        Some(p) => p,
        None => rpassword::prompt_password("Vault passphrase: ")?,
    };

    let accessor: Arc<dyn FsAccessor> = Arc::new(PooledBackend::new(LocalVolume::new(&root)));

    tracing::info!(root = %root, workers = args.workers, "unlocking vault");
    let workers = args.workers;
    let tree = {
        let root = root.clone();
        tokio::task::spawn_blocking(move || {
            FileTree::open(&root, passphrase.as_bytes(), workers, accessor)
        })
        .await
        .context("vault unlock task failed")?
        .context("failed to open vault")?
    };
    let tree = Arc::new(tree);

    let listener = NFSTcpListener::bind(&args.listen, PlainViewNfs::new(Arc::clone(&tree)))
        .await
        .with_context(|| format!("failed to bind NFS listener on {}", args.listen))?;
    tracing::info!(listen = %args.listen, "serving plaintext view");

    tokio::select! {
        result = listener.handle_forever() => {
            result.context("NFS server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    tree.shutdown();
    Ok(())
}
