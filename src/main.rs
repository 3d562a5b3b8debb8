use api_client::{MarketDataClient, YahooClient};
use backtester::BacktestEngine;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use configuration::Config;
use database::{DbRepository, connect, run_migrations};
use engine::SyncEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// The main entry point for the etfsync application.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables (DATABASE_URL) from the .env file if present.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = configuration::load_config()?;

    // Initialize the database connection and run migrations.
    let pool = connect(
        config.database.max_connections,
        Duration::from_secs(config.database.acquire_timeout_secs),
    )
    .await?;
    run_migrations(&pool).await?;
    let repo = DbRepository::new(pool);

    match cli.command {
        Commands::Sync(args) => handle_sync(args, repo, config).await,
        Commands::Backtest(args) => handle_backtest(args, repo, config).await,
        Commands::Report(args) => handle_report(args, repo).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Incremental ETF time-series sync, total-return indexing, and backtesting.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync cycle: fetch new data, extend TRI series, recompute windows.
    Sync(SyncArgs),

    /// Recompute the backtest windows for one instrument without fetching.
    Backtest(BacktestArgs),

    /// Print the stored backtest results for one instrument as JSON.
    Report(ReportArgs),
}

#[derive(Parser)]
struct SyncArgs {
    /// Sync a single instrument instead of the whole active universe.
    #[arg(long)]
    instrument: Option<String>,

    /// Treat this date as "today" (format: YYYY-MM-DD). Defaults to the
    /// current UTC date.
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

#[derive(Parser)]
struct BacktestArgs {
    /// The instrument to recompute windows for (e.g., "0050.TW").
    #[arg(long)]
    instrument: String,

    /// The window end date (format: YYYY-MM-DD). Defaults to the current
    /// UTC date.
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

#[derive(Parser)]
struct ReportArgs {
    /// The instrument to report on.
    #[arg(long)]
    instrument: String,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_sync(args: SyncArgs, repo: DbRepository, config: Config) -> anyhow::Result<()> {
    let today = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let client: Arc<dyn MarketDataClient> = Arc::new(YahooClient::new(&config.market_data));
    let engine = SyncEngine::new(repo.clone(), client, Arc::new(config));

    match args.instrument {
        Some(instrument_id) => {
            let instrument = repo.get_instrument(&instrument_id).await?;
            let report = engine.sync_instrument(&instrument, today).await?;
            println!(
                "{}: {} prices, {} dividends, {} TRI points; windows done {:?}, skipped {:?}",
                report.instrument_id,
                report.prices_added,
                report.dividends_added,
                report.tri_added,
                report.windows_done,
                report.windows_skipped,
            );
        }
        None => {
            let summary = engine.run_cycle(today).await?;
            println!(
                "Cycle finished in {:.1?}: {} processed, {} succeeded, {} failed",
                summary.elapsed, summary.processed, summary.succeeded, summary.failed
            );
            for report in summary.reports.iter().filter(|r| !r.is_success()) {
                println!("  {}: {:?}", report.instrument_id, report.outcome);
            }
        }
    }
    Ok(())
}

async fn handle_backtest(
    args: BacktestArgs,
    repo: DbRepository,
    config: Config,
) -> anyhow::Result<()> {
    let end_date = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let backtester = BacktestEngine::new(repo, config.backtest.clone());
    let summary = backtester.compute_windows(&args.instrument, end_date).await?;
    println!(
        "{}: windows done {:?}, skipped {:?}",
        args.instrument, summary.done, summary.skipped
    );
    for row in &summary.results {
        println!(
            "  {}  {} -> {}  total {:.4}  cagr {:.4}  vol {:.4}  sharpe {:.4}  mdd {:.4}",
            row.window_label,
            row.window_start_date,
            row.window_end_date,
            row.total_return,
            row.cagr,
            row.volatility,
            row.sharpe_ratio,
            row.max_drawdown,
        );
    }
    Ok(())
}

async fn handle_report(args: ReportArgs, repo: DbRepository) -> anyhow::Result<()> {
    let results = repo.read_backtest_results(&args.instrument).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
