//! Scan command: evaluate every configured symbol as of one date

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use momentum_scanner::risk::RiskManagerConfig;
use momentum_scanner::{data, report, SignalEvaluator};

use super::{load_config, MarketData};

pub fn run(
    config_path: Option<String>,
    aggressive: bool,
    date: Option<String>,
    top: usize,
    all: bool,
    output: Option<String>,
) -> Result<()> {
    info!("Starting scan");

    let config = load_config(config_path.as_deref(), aggressive)?;
    let market = MarketData::load(&config)?;

    let as_of = match date.as_deref() {
        Some(d) => data::parse_date(d)?,
        None => market.date_range(None, None)?.1,
    };
    info!("Scanning {} symbols as of {}", market.universe.len(), as_of);

    let universe: BTreeMap<_, _> = market
        .universe
        .iter()
        .map(|(symbol, bars)| (symbol.clone(), data::history_until(bars, as_of).to_vec()))
        .filter(|(_, bars)| !bars.is_empty())
        .collect();

    let risk = RiskManagerConfig::from_simulation(&config.simulation).build();
    let evaluator =
        SignalEvaluator::new(config.scanner.clone()).with_sizing(risk, config.simulation.starting_equity);
    let results = evaluator.scan(&universe);
    let gate_open = market.gate().allows_entries(as_of);

    let shown: Vec<_> = results
        .iter()
        .filter(|r| all || r.entry_ok)
        .take(top)
        .collect();

    println!("\n{}", "=".repeat(110));
    println!(
        "SCAN {} | {} evaluated, {} entry signals | market regime: {}",
        as_of,
        results.len(),
        results.iter().filter(|r| r.entry_ok).count(),
        if gate_open { "OPEN" } else { "CLOSED (no new entries)" }
    );
    println!("{}", "=".repeat(110));
    println!(
        "{:<8} {:>10} {:>5} {:>6} {:>5} {:>5} {:>6} {:>6} {:>7} {:>10} {:>10} {:>10} {:>7}",
        "Symbol", "Price", "Entry", "Str", "Base", "Filt", "Align", "Mom", "Z", "Stop", "TP1", "TP2", "Shares"
    );
    println!("{}", "-".repeat(110));
    for r in &shown {
        println!(
            "{:<8} {:>10.2} {:>5} {:>6} {:>5} {:>5} {:>6.2} {:>6.2} {:>7.2} {:>10.2} {:>10.2} {:>10.2} {:>7.1}",
            r.symbol.as_str(),
            r.price,
            if r.entry_ok { "YES" } else { "-" },
            r.strength,
            r.base_score,
            r.filter_score,
            r.alignment_ratio,
            r.momentum_ratio,
            r.momentum.dominant_zscore,
            r.stop_loss,
            r.tp1,
            r.tp2,
            r.position_size
        );
    }
    println!("{}", "=".repeat(110));

    if let Some(dir) = output {
        let path = Path::new(&dir).join(format!("scan_{}.csv", as_of));
        let rows: Vec<_> = shown.into_iter().cloned().collect();
        report::write_signals_csv(&path, &rows)?;
        println!("Results written to {}", path.display());
    }

    info!("Scan completed");
    Ok(())
}
