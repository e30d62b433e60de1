//! blobfs -- filesystem commands against a blob container.
//!
//! Every command builds the configured storage driver, runs one
//! filesystem operation and prints the result on stdout.  Logs go to
//! stderr so `cat` output stays clean.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::info;

use blobfs::config::{Config, LoggingConfig};
use blobfs::registry::DriverRegistry;
use blobfs::storage::backend::{ByteReader, Filesystem, ResponseOverrides, WriteOptions};

/// Command-line arguments for blobfs.
#[derive(Parser, Debug)]
#[command(
    name = "blobfs",
    version,
    about = "Filesystem operations on Azure Blob Storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the storage driver (azure, memory).
    #[arg(short, long)]
    driver: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory.
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print a file to stdout.
    Cat { path: String },
    /// Upload a local file.
    Put {
        path: String,
        file: PathBuf,
        /// Content type to store instead of the detected one.
        #[arg(long)]
        mime_type: Option<String>,
        #[arg(long)]
        cache_control: Option<String>,
    },
    /// Delete a file.
    Rm { path: String },
    /// Copy a file.
    Cp { source: String, destination: String },
    /// Move a file.
    Mv { source: String, destination: String },
    /// Create a directory.
    Mkdir { path: String },
    /// Delete a directory and everything below it.
    Rmdir { path: String },
    /// Print size, content type and modification time as JSON.
    Stat { path: String },
    /// Print whether a file (or with --dir, a directory) exists.
    Exists {
        path: String,
        #[arg(long)]
        dir: bool,
    },
    /// Print the public URL of a file.
    Url { path: String },
    /// Print a read-only URL that expires.
    Presign {
        path: String,
        /// Lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        expires_in: i64,
        /// Content-Disposition the service should answer with.
        #[arg(long)]
        content_disposition: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => blobfs::config::load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(driver) = cli.driver.clone() {
        config.storage.driver = driver;
    }

    init_logging(&config.logging);
    blobfs::metrics::describe_metrics();
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    let fs = DriverRegistry::with_defaults().create_from_config(&config.storage)?;
    run(fs.as_ref(), cli.command).await
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(fs: &dyn Filesystem, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ls { path, recursive } => {
            let mut entries = fs.list_contents(&path, recursive);
            while let Some(entry) = entries.next().await {
                let entry = entry?;
                if entry.is_dir() {
                    println!("{:>12}  {:<25}  {}/", "-", "-", entry.path);
                } else {
                    println!(
                        "{:>12}  {:<25}  {}",
                        entry.file_size.unwrap_or_default(),
                        entry
                            .last_modified
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string()),
                        entry.path
                    );
                }
            }
        }
        Command::Cat { path } => {
            let mut reader = fs.read_stream(&path).await?;
            tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?;
        }
        Command::Put {
            path,
            file,
            mime_type,
            cache_control,
        } => {
            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let reader: ByteReader = Box::pin(handle);
            let options = WriteOptions {
                mime_type,
                cache_control,
            };
            fs.write_stream(&path, reader, &options).await?;
            info!("Uploaded {} to {}", file.display(), path);
        }
        Command::Rm { path } => fs.delete(&path).await?,
        Command::Cp {
            source,
            destination,
        } => fs.copy(&source, &destination).await?,
        Command::Mv {
            source,
            destination,
        } => fs.move_file(&source, &destination).await?,
        Command::Mkdir { path } => fs.create_directory(&path).await?,
        Command::Rmdir { path } => fs.delete_directory(&path).await?,
        Command::Stat { path } => {
            let attrs = fs.file_size(&path).await?;
            let rendered = serde_json::json!({
                "path": attrs.path,
                "file_size": attrs.file_size,
                "mime_type": attrs.mime_type,
                "last_modified": attrs.last_modified.map(|t| t.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        Command::Exists { path, dir } => {
            let found = if dir {
                fs.directory_exists(&path).await?
            } else {
                fs.exists(&path).await?
            };
            println!("{}", found);
        }
        Command::Url { path } => println!("{}", fs.get_url(&path)?),
        Command::Presign {
            path,
            expires_in,
            content_disposition,
        } => {
            let overrides = ResponseOverrides {
                content_disposition,
                ..Default::default()
            };
            let expires_at = expiry_after(expires_in)?;
            println!("{}", fs.temporary_url(&path, expires_at, &overrides)?);
        }
    }
    Ok(())
}

/// Absolute expiry `seconds` from now. The lifetime must be positive.
fn expiry_after(seconds: i64) -> anyhow::Result<DateTime<Utc>> {
    if seconds <= 0 {
        anyhow::bail!("--expires-in must be positive, got {}", seconds);
    }
    TimeDelta::try_seconds(seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| anyhow::anyhow!("--expires-in {} is out of range", seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobfs::storage::memory::MemoryFilesystem;
    use bytes::Bytes;

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::parse_from(["blobfs", "--driver", "memory", "ls", "dir", "--recursive"]);
        assert_eq!(cli.driver.as_deref(), Some("memory"));
        assert!(matches!(
            cli.command,
            Command::Ls {
                ref path,
                recursive: true
            } if path == "dir"
        ));

        let cli = Cli::parse_from(["blobfs", "presign", "a.txt", "--expires-in", "60"]);
        assert!(matches!(
            cli.command,
            Command::Presign { expires_in: 60, .. }
        ));
    }

    #[test]
    fn test_expiry_bounds() {
        let expires_at = expiry_after(60).unwrap();
        assert!(expires_at > Utc::now());
        assert!(expiry_after(0).is_err());
        assert!(expiry_after(-5).is_err());
        assert!(expiry_after(i64::MAX).is_err());
        assert!(expiry_after(i64::MAX / 1000 - 1).is_err());
    }

    #[tokio::test]
    async fn test_run_against_memory() {
        let fs = MemoryFilesystem::new();
        fs.write("a.txt", Bytes::from_static(b"hi"), &WriteOptions::default())
            .await
            .unwrap();

        run(
            &fs,
            Command::Cp {
                source: "a.txt".to_string(),
                destination: "b.txt".to_string(),
            },
        )
        .await
        .unwrap();
        run(&fs, Command::Mkdir { path: "d".to_string() })
            .await
            .unwrap();
        run(
            &fs,
            Command::Ls {
                path: String::new(),
                recursive: false,
            },
        )
        .await
        .unwrap();

        assert!(fs.exists("b.txt").await.unwrap());
        assert!(fs.directory_exists("d").await.unwrap());
        assert!(run(&fs, Command::Url { path: "a.txt".to_string() })
            .await
            .is_err());
    }
}
