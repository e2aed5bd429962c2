//! # seqlog CLI
//!
//! ```bash
//! seqlog --data-dir ./data info
//! seqlog --data-dir ./data write 'hello'
//! seqlog --data-dir ./data get 1
//! seqlog --config seqlog.toml dump backup.bin
//! seqlog --data-dir ./restored load backup.bin
//! ```
//!
//! Settings come from an optional TOML file; `--data-dir` overrides the
//! directory it names.

mod archive;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use seqlog_core::LogConfig;
use seqlog_storage::{inspect, SegmentLayout, SequentialLog};

use archive::Archive;

#[derive(Parser)]
#[command(name = "seqlog")]
#[command(about = "Segmented append-only log", version = seqlog_core::VERSION)]
struct Cli {
    /// TOML file with log settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log directory, overrides the config file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a summary of every segment file
    Info,
    /// Append a payload and print its offset
    Write {
        /// Payload text
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        value: Option<String>,
        /// Read the payload from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print the payload stored at an offset
    Get {
        offset: u64,
        /// Print as hex instead of raw bytes
        #[arg(long)]
        hex: bool,
    },
    /// Write every payload to an archive file
    Dump { output: PathBuf },
    /// Append every payload of an archive file
    Load { input: PathBuf },
}

fn load_config(cli: &Cli) -> Result<LogConfig> {
    let mut config = match &cli.config {
        Some(path) => LogConfig::from_toml_file(path)?,
        None => LogConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Info => {
            config.validate()?;
            let layout = SegmentLayout::from_config(&config);
            let summaries = inspect(&config.data_dir, &layout)
                .with_context(|| format!("Failed to inspect {}", config.data_dir.display()))?;
            for summary in summaries {
                println!("{}", summary);
            }
        }
        Commands::Write { value, file } => {
            let payload = match (value, file) {
                (_, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (Some(value), None) => value.into_bytes(),
                (None, None) => Vec::new(),
            };
            let log = SequentialLog::open(config).await?;
            let result = log.write(payload).await;
            log.close().await?;
            println!("{}", result?);
        }
        Commands::Get { offset, hex } => {
            let log = SequentialLog::open(config).await?;
            let result = log.get(offset);
            log.close().await?;
            let payload = result?;
            if hex {
                println!("{}", hex::encode(&payload));
            } else {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&payload)?;
                stdout.flush()?;
            }
        }
        Commands::Dump { output } => {
            let log = SequentialLog::open(config).await?;
            let result = log.dump();
            log.close().await?;
            let archive = Archive::new(result?);
            archive.write_to(&output)?;
            info!("Dumped {} payloads to {:?}", archive.payloads.len(), output);
            println!("{}", archive.payloads.len());
        }
        Commands::Load { input } => {
            let archive = Archive::read_from(&input)?;
            let log = SequentialLog::open(config).await?;
            let result = log.load(archive.payloads).await;
            log.close().await?;
            let offsets = result?;
            match (offsets.first(), offsets.last()) {
                (Some(first), Some(last)) => println!("{}..={}", first, last),
                _ => println!("0 payloads"),
            }
        }
    }

    Ok(())
}
