//! Momentum scanner - main entry point
//!
//! This binary provides three subcommands:
//! - scan: evaluate the universe for entry signals as of a date
//! - backtest: simulate the portfolio over a date range
//! - walk-forward: rolling train/test parameter optimization

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "momentum-scanner")]
#[command(about = "Adaptive momentum scanner with backtesting and walk-forward optimization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan symbols for entry signals
    Scan {
        /// Path to configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Use the aggressive (looser) scanner thresholds
        #[arg(long)]
        aggressive: bool,

        /// Evaluate as of this date (YYYY-MM-DD), default: latest bar
        #[arg(short, long)]
        date: Option<String>,

        /// Number of results to show
        #[arg(short, long, default_value = "20")]
        top: usize,

        /// Show symbols without an entry signal too
        #[arg(long)]
        all: bool,

        /// Directory for the CSV export
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run portfolio backtest
    Backtest {
        /// Path to configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Use the aggressive (looser) scanner thresholds
        #[arg(long)]
        aggressive: bool,

        /// Entry rule: scanner (full gate) or daily_score
        #[arg(long)]
        entry_rule: Option<String>,

        /// Starting equity
        #[arg(long)]
        capital: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Directory for trades.csv and equity.csv
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Walk-forward parameter optimization
    WalkForward {
        /// Path to configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Use the aggressive (looser) scanner thresholds
        #[arg(long)]
        aggressive: bool,

        /// Entry rule: scanner (full gate) or daily_score
        #[arg(long)]
        entry_rule: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Training window in calendar days
        #[arg(long)]
        train_days: Option<i64>,

        /// Test window in calendar days
        #[arg(long)]
        test_days: Option<i64>,

        /// Objective (cagr, sharpe, max_drawdown, win_rate, avg_r, expectancy, profit_factor)
        #[arg(long)]
        objective: Option<String>,

        /// Grid override, repeatable. E.g., --override vol_multiplier=1.3,1.5
        #[arg(long = "override", value_name = "KEY=V1,V2")]
        overrides: Vec<String>,

        /// Directory for walk_forward.csv
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Log to `logs/<command>-<timestamp>.log`, and to stderr unless `file_only`
fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<PathBuf> {
    let dir = PathBuf::from("logs");
    std::fs::create_dir_all(&dir)?;
    let file_name = format!(
        "{}-{}.log",
        command_name,
        chrono::Local::now().format("%Y%m%dT%H%M%S")
    );

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let to_file = tracing_subscriber::fmt::layer()
        .with_writer(tracing_appender::rolling::never(&dir, &file_name))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);
    // walk-forward keeps the terminal for its progress bar
    let to_console = (!file_only).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(to_file)
        .with(to_console)
        .init();

    Ok(dir.join(file_name))
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Scan { .. } => ("scan", false),
        Commands::Backtest { .. } => ("backtest", false),
        Commands::WalkForward { .. } => ("walk-forward", true),
    };

    let log_path = setup_logging(cli.verbose, command_name, file_only)?;
    info!(command = command_name, log = %log_path.display(), "momentum-scanner {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Scan {
            config,
            aggressive,
            date,
            top,
            all,
            output,
        } => commands::scan::run(config, aggressive, date, top, all, output),

        Commands::Backtest {
            config,
            aggressive,
            entry_rule,
            capital,
            start,
            end,
            output,
        } => commands::backtest::run(config, aggressive, entry_rule, capital, start, end, output),

        Commands::WalkForward {
            config,
            aggressive,
            entry_rule,
            start,
            end,
            train_days,
            test_days,
            objective,
            overrides,
            output,
        } => commands::walk_forward::run(
            config, aggressive, entry_rule, start, end, train_days, test_days, objective, overrides,
            output,
        ),
    }
}
