use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use objectfs::{FileStatus, ObjectFileSystem, config};
use std::path::PathBuf;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing_subscriber::EnvFilter;

/// Local I/O chunk for `put`/`get`.
const COPY_CHUNK: usize = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Filesystem operations on a Swift-style object store")]
struct Cli {
    #[command(flatten)]
    args: config::Args,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory (or show a single file)
    Ls { path: String },
    /// Show the status of one path
    Stat { path: String },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// Upload a local file
    Put {
        local: PathBuf,
        remote: String,
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Download a file
    Get { remote: String, local: PathBuf },
    /// Delete a file or directory
    Rm {
        path: String,
        /// Delete directories with everything below them
        #[arg(short, long)]
        recursive: bool,
    },
    /// Rename a file or directory
    Mv { src: String, dst: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::FsConfig::from_env_and_args(cli.args)?;
    tracing::debug!("Starting objectfs with config: {:?}", cfg);

    let uri = format!("swift://{}/", cfg.container);
    let fs = ObjectFileSystem::initialize(&uri, cfg)
        .await
        .context("connecting to the object store")?;

    match cli.command {
        Command::Ls { path } => {
            for status in fs.list_status(&path).await? {
                print_status(&status);
            }
        }
        Command::Stat { path } => print_status(&fs.get_file_status(&path).await?),
        Command::Mkdir { path } => {
            fs.mkdirs(&path).await?;
        }
        Command::Put {
            local,
            remote,
            force,
        } => {
            let mut input = File::open(&local)
                .await
                .with_context(|| format!("opening {}", local.display()))?;
            let mut writer = fs.create(&remote, force).await?;
            let mut chunk = vec![0u8; COPY_CHUNK];
            loop {
                let n = input.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                writer.write(&chunk[..n]).await?;
            }
            writer.close().await?;
            tracing::info!("uploaded {} to {}", local.display(), remote);
        }
        Command::Get { remote, local } => {
            let mut reader = fs.open(&remote).await?;
            let mut output = File::create(&local)
                .await
                .with_context(|| format!("creating {}", local.display()))?;
            let mut chunk = vec![0u8; COPY_CHUNK];
            loop {
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                output.write_all(&chunk[..n]).await?;
            }
            output.flush().await?;
            reader.close();
            tracing::info!("downloaded {} to {}", remote, local.display());
        }
        Command::Rm { path, recursive } => {
            if !fs.delete(&path, recursive).await? {
                anyhow::bail!("no such path: {}", path);
            }
        }
        Command::Mv { src, dst } => {
            if !fs.rename(&src, &dst).await? {
                anyhow::bail!("rename {} -> {} failed", src, dst);
            }
        }
    }

    Ok(())
}

fn print_status(status: &FileStatus) {
    let kind = if status.is_directory { 'd' } else { '-' };
    println!(
        "{kind} {:>12} {} {}",
        status.length,
        status.last_modified.format("%Y-%m-%d %H:%M"),
        status.path
    );
}
