use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use imgview_cache::CacheConfig;
use imgview_transfer::{TransferEngine, TransferOutcome};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod browse;
mod watch;

pub use watch::{DirChange, DirWatcher};

#[derive(Debug, Parser)]
#[command(name = "imgview")]
#[command(about = "Browse image collections through a prefetching cache")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Walk the images in a directory and report cache activity.
    Browse(BrowseArgs),
    /// Download one resource through the transfer engine.
    Fetch {
        #[arg(value_name = "URL")]
        url: String,
        /// Write the body here instead of stdout.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
pub(crate) struct BrowseArgs {
    #[arg(value_name = "DIR")]
    pub(crate) dir: PathBuf,
    /// Items kept decoded on each side of the cursor.
    #[arg(long)]
    pub(crate) radius: Option<usize>,
    /// How many times to advance the cursor.
    #[arg(long, default_value_t = 0)]
    pub(crate) steps: usize,
    /// Minimum time spent at each position, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub(crate) dwell: u64,
    #[arg(long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,
    /// Emit one JSON object per line.
    #[arg(long)]
    pub(crate) json: bool,
    /// Apply files added to or removed from DIR while browsing.
    #[arg(long)]
    pub(crate) watch: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Browse(args) => browse::run_browse(args),
        Commands::Fetch {
            url,
            output,
            config,
        } => run_fetch(&url, output.as_deref(), config.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    CacheConfig::load(path).context("failed to load configuration")
}

fn run_fetch(url: &str, output: Option<&Path>, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let engine = TransferEngine::new(config.transfer);
    let transfer = engine.fetch(url).context("failed to start transfer engine")?;

    let outcome = loop {
        if let Some(outcome) = transfer.wait_timeout(Duration::from_millis(250)) {
            break outcome;
        }
        let progress = transfer.progress();
        match progress.fraction() {
            Some(fraction) => eprintln!("{} bytes ({:.0}%)", progress.received, fraction * 100.0),
            None => eprintln!("{} bytes", progress.received),
        }
    };
    engine.shutdown();

    match outcome {
        TransferOutcome::Completed(bytes) => {
            match output {
                Some(path) => fs::write(path, &bytes[..])
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => std::io::stdout()
                    .write_all(&bytes)
                    .context("failed to write to stdout")?,
            }
            eprintln!("fetched {} bytes in {} attempt(s)", bytes.len(), transfer.attempts());
            Ok(())
        }
        TransferOutcome::Cancelled => anyhow::bail!("transfer of {url} was cancelled"),
        TransferOutcome::Failed(err) => Err(err).with_context(|| format!("failed to fetch {url}")),
    }
}
