use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gridq::cache::PartitionedCache;
use gridq::ctl::{self, CtlContext};
use gridq::settings::AppConfig;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "gridq")]
#[command(about = "Colocated FIFO queues on a partitioned cache")]
#[command(version)]
/// Application CLI arguments
struct Args {
    /// whether to be verbose
    #[arg(short = 'v', global = true)]
    verbose: bool,

    /// path to a TOML config file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format instead of plain text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a queue, or report the existing one
    Create {
        queue: String,
        /// Maximum number of live items; 0 means unbounded
        #[arg(long, default_value = "0")]
        capacity: u64,
    },
    /// Append a payload to a queue
    Offer { queue: String, payload: String },
    /// Remove and print the head item
    Poll { queue: String },
    /// Print the head item without removing it
    Peek { queue: String },
    /// Print the number of live items
    Size { queue: String },
    /// Print every live item key, one JSON object per line
    List { queue: String },
    /// Show the partition, owning node and affinity token of a queue
    Route { queue: String },
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cfg = AppConfig::load(args.config.as_deref())?;
    gridq::trace::init(cfg.logging.format, args.verbose)?;
    debug!(?args, "starting");

    let cache = PartitionedCache::open(&cfg.cache, &cfg.cluster).await?;
    let ctx = CtlContext {
        cache: cache.clone(),
        policy: cfg.allocator.backoff_policy(),
        json: args.json,
    };
    let mut stdout = io::stdout();

    let result = match &args.command {
        Command::Create { queue, capacity } => {
            ctl::create(&ctx, &mut stdout, queue, *capacity).await
        }
        Command::Offer { queue, payload } => ctl::offer(&ctx, &mut stdout, queue, payload).await,
        Command::Poll { queue } => ctl::poll(&ctx, &mut stdout, queue).await,
        Command::Peek { queue } => ctl::peek(&ctx, &mut stdout, queue).await,
        Command::Size { queue } => ctl::size(&ctx, &mut stdout, queue).await,
        Command::List { queue } => ctl::list(&ctx, &mut stdout, queue).await,
        Command::Route { queue } => ctl::route(&ctx, &mut stdout, queue),
    };

    if let Err(e) = cache.close().await {
        warn!(error = %e, "failed to close cache");
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
