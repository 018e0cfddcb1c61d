//! Walk-forward command with progress tracking

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::info;

use momentum_scanner::grid::{self, format_params};
use momentum_scanner::{report, Objective, WalkForwardOptimizer};

use super::{load_config, override_entry_rule, override_opt, MarketData};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config_path: Option<String>,
    aggressive: bool,
    entry_rule: Option<String>,
    start_override: Option<String>,
    end_override: Option<String>,
    train_days: Option<i64>,
    test_days: Option<i64>,
    objective: Option<String>,
    overrides: Vec<String>,
    output: Option<String>,
) -> Result<()> {
    info!("Starting walk-forward optimization");

    let mut config = load_config(config_path.as_deref(), aggressive)?;
    override_entry_rule(&mut config, entry_rule)?;
    override_opt(&mut config.data.start_date, start_override, "start date");
    override_opt(&mut config.data.end_date, end_override, "end date");
    if let Some(days) = train_days {
        config.walk_forward.train_days = days;
    }
    if let Some(days) = test_days {
        config.walk_forward.test_days = days;
    }
    if let Some(name) = objective {
        config.walk_forward.objective = name
            .parse::<Objective>()
            .map_err(anyhow::Error::msg)?;
    }
    grid::apply_overrides(&mut config.grid, &overrides);
    config.validate().context("Configuration rejected")?;

    let market = MarketData::load(&config)?;
    let (start, end) = market.date_range(
        config.data.start_date.as_deref(),
        config.data.end_date.as_deref(),
    )?;

    let optimizer = WalkForwardOptimizer::new(
        &config.scanner,
        &config.simulation,
        config.walk_forward.clone(),
        config.grid.as_ref(),
    )?;
    let windows = optimizer.windows(start, end);
    if windows.is_empty() {
        anyhow::bail!(
            "Range {} -> {} is too short for a {}-day train and {}-day test window",
            start,
            end,
            config.walk_forward.train_days,
            config.walk_forward.test_days
        );
    }

    let total_runs = windows.len() * optimizer.cell_count();
    println!("\n{}", "=".repeat(70));
    println!("WALK-FORWARD SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Symbols:       {}", market.universe.len());
    println!("  Range:         {} -> {}", start, end);
    println!(
        "  Windows:       {} (train {}d, test {}d)",
        windows.len(),
        config.walk_forward.train_days,
        config.walk_forward.test_days
    );
    println!("  Parameters:    {} combinations", optimizer.cell_count());
    println!("  Objective:     {}", optimizer.objective());
    println!("  Total runs:    {}", total_runs);
    println!("{}\n", "=".repeat(70));

    let pb = ProgressBar::new(total_runs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}]")?
            .progress_chars("█░ "),
    );

    let results = optimizer.run(&market.universe, &market.index, start, end, Some(&pb));
    pb.finish_and_clear();

    println!("\n{}", "=".repeat(130));
    println!("WALK-FORWARD WINDOWS (chosen by in-sample {})", optimizer.objective());
    println!("{}", "=".repeat(130));
    println!(
        "{:<23} {:<23} {:>9} {:>8} {:>8} {:>8} {:>7} {:>7} {:>10}  {}",
        "Train", "Test", "CAGR%", "Sharpe", "MaxDD%", "Win%", "AvgR", "Trades", "IS CAGR%", "Params"
    );
    println!("{}", "-".repeat(130));
    for w in &results {
        let train = format!("{} -> {}", w.train_start, w.train_end);
        let test = format!("{} -> {}", w.test_start, w.test_end);
        let params = w
            .chosen_parameters
            .as_ref()
            .map(format_params)
            .unwrap_or_else(|| "(no trades in train window)".to_string());
        let is_cagr = w
            .in_sample
            .as_ref()
            .map_or("-".to_string(), |m| format!("{:.2}", m.cagr * 100.0));
        match &w.out_of_sample {
            Some(m) => println!(
                "{:<23} {:<23} {:>9.2} {:>8.2} {:>8.2} {:>8.2} {:>7.2} {:>7} {:>10}  {}",
                train,
                test,
                m.cagr * 100.0,
                m.sharpe,
                m.max_drawdown * 100.0,
                m.win_rate,
                m.avg_r,
                m.total_trades,
                is_cagr,
                params
            ),
            None => println!(
                "{:<23} {:<23} {:>9} {:>8} {:>8} {:>8} {:>7} {:>7} {:>10}  {}",
                train, test, "-", "-", "-", "-", "-", 0, is_cagr, params
            ),
        }
    }
    println!("{}", "=".repeat(130));

    let traded: Vec<_> = results.iter().filter_map(|w| w.out_of_sample.as_ref()).collect();
    if !traded.is_empty() {
        let n = traded.len() as f64;
        println!(
            "Out-of-sample mean over {} windows: CAGR {:.2}%, Sharpe {:.2}, AvgR {:.2}",
            traded.len(),
            traded.iter().map(|m| m.cagr).sum::<f64>() / n * 100.0,
            traded.iter().map(|m| m.sharpe).sum::<f64>() / n,
            traded.iter().map(|m| m.avg_r).sum::<f64>() / n
        );
    }

    if let Some(dir) = output {
        let path = Path::new(&dir).join("walk_forward.csv");
        report::write_windows_csv(&path, &results)?;
        println!("Window results written to {}", path.display());
    }

    info!("Walk-forward completed: {} windows", results.len());
    Ok(())
}
