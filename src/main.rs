use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use kalshi_lob_rs::feed::{Credentials, FeedSupervisor, MarketCatalog, SupervisorConfig};
use kalshi_lob_rs::persist::RecorderConfig;
use kalshi_lob_rs::telemetry;

#[derive(Debug, Parser)]
#[command(name = "kalshi-lob", about = "Record order-book state for Kalshi markets")]
struct Args {
    /// Series ticker used to discover open markets (e.g. KXNBAGAME).
    #[arg(long, default_value = "KXNBAGAME")]
    series: String,

    /// Explicit market tickers; skips series discovery when given.
    #[arg(long = "ticker")]
    tickers: Vec<String>,

    /// Root directory for per-ticker day files.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Queued events per recorder before the dispatch path backpressures.
    #[arg(long, default_value_t = 100_000)]
    queue_capacity: usize,

    /// Records per flush batch.
    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Seconds between forced flushes of a partial batch.
    #[arg(long, default_value_t = 10)]
    flush_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("info,kalshi_lob_rs=debug");
    telemetry::init_metrics();

    let args = Args::parse();
    let credentials = Credentials::from_env()?;

    let tickers = if args.tickers.is_empty() {
        MarketCatalog::new()
            .open_markets(&args.series)
            .await?
            .into_iter()
            .map(|market| market.ticker)
            .collect()
    } else {
        args.tickers
    };
    anyhow::ensure!(
        !tickers.is_empty(),
        "no open markets found for series {}",
        args.series
    );
    info!(markets = tickers.len(), "starting feed session");

    let config = SupervisorConfig {
        data_dir: args.data_dir,
        recorder: RecorderConfig {
            queue_capacity: args.queue_capacity,
            batch_size: args.batch_size,
            flush_interval: Duration::from_secs(args.flush_interval_secs),
        },
    };
    FeedSupervisor::new(credentials, tickers, config)
        .run()
        .await?;
    Ok(())
}
