//! blobkv CLI
//!
//! Reads and writes one partition directory.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use blobkv::{open_partition, Backend, BlobError, Config, FilePartition, ValueRecord};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// blobkv partition tool
#[derive(Parser, Debug)]
#[command(name = "blobkv")]
#[command(about = "Inspect and modify a blobkv partition")]
#[command(version)]
struct Args {
    /// Partition directory
    #[arg(short, long, global = true, default_value = "./blobkv_data")]
    data_dir: PathBuf,

    /// Partition backend (file or index)
    #[arg(short, long, global = true, default_value = "file")]
    backend: Backend,

    /// Values shorter than this many bytes are stored inline
    #[arg(long, global = true, default_value = "64")]
    min_size: usize,

    /// Open-file cache capacity
    #[arg(long, global = true, default_value = "100")]
    max_open_files: usize,

    /// Per-file size cap in bytes
    #[arg(long, global = true, default_value_t = 1 << 40)]
    max_file_size: u64,

    /// Capacity budget in bytes for free-space estimates (0 = unknown)
    #[arg(long, global = true, default_value = "0")]
    max_file_space: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a value
    Put {
        /// The key to set
        key: String,

        /// The value to store
        #[arg(required_unless_present = "file")]
        value: Option<String>,

        /// Read the value from a file instead
        #[arg(short, long, conflicts_with = "value")]
        file: Option<PathBuf>,
    },

    /// Write a value to stdout
    Get {
        /// The key to get
        key: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Show where a value is stored
    Stat {
        /// The key to inspect
        key: String,
    },

    /// Print the free-space estimate
    Free,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blobkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .backend(args.backend)
        .min_size(args.min_size)
        .max_open_files(args.max_open_files)
        .max_file_size(args.max_file_size)
        .max_file_space(args.max_file_space)
        .build();

    if let Err(e) = run(&config, args.command) {
        tracing::error!("{}", e);
        process::exit(match e {
            BlobError::NotFound => 2,
            _ => 1,
        });
    }
}

fn run(config: &Config, command: Commands) -> blobkv::Result<()> {
    match command {
        Commands::Put { key, value, file } => {
            let value = match (value, file) {
                (_, Some(path)) => fs::read(&path)?,
                (Some(value), None) => value.into_bytes(),
                (None, None) => {
                    return Err(BlobError::Config("no value given".to_string()));
                }
            };
            let partition = open_partition(config)?;
            partition.put(key.as_bytes(), &value)?;
            tracing::info!(key = %key, len = value.len(), "stored value");
        }

        Commands::Get { key } => {
            let partition = open_partition(config)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            partition.get(key.as_bytes(), &mut out)?;
            out.flush()?;
        }

        Commands::Del { key } => {
            let partition = open_partition(config)?;
            partition.put(key.as_bytes(), &[])?;
            tracing::info!(key = %key, "deleted key");
        }

        Commands::Stat { key } => {
            if config.backend != Backend::File {
                return Err(BlobError::Config(format!(
                    "stat needs the file backend, not {}",
                    config.backend
                )));
            }
            let partition = FilePartition::open(config)?;
            match partition.record(key.as_bytes())? {
                Some(ValueRecord::Inline(value)) => {
                    println!("inline {} bytes", value.len());
                }
                Some(ValueRecord::Redirect { file, offset }) => {
                    println!("redirect file {:06} offset {}", file, offset);
                }
                None => return Err(BlobError::NotFound),
            }
        }

        Commands::Free => {
            let partition = open_partition(config)?;
            println!("{}", partition.approx_free_space());
        }
    }
    Ok(())
}
