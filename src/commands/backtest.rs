//! Backtest command implementation

use anyhow::Result;
use std::path::Path;
use tracing::info;

use momentum_scanner::{report, signal, TradeSimulator};

use super::{load_config, override_entry_rule, override_opt, MarketData};

pub fn run(
    config_path: Option<String>,
    aggressive: bool,
    entry_rule: Option<String>,
    capital_override: Option<f64>,
    start_override: Option<String>,
    end_override: Option<String>,
    output: Option<String>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = load_config(config_path.as_deref(), aggressive)?;
    override_entry_rule(&mut config, entry_rule)?;

    if let Some(capital) = capital_override {
        info!("Overriding starting equity to: ${:.2}", capital);
        config.simulation.starting_equity = capital;
        config.simulation.validate()?;
    }
    override_opt(&mut config.data.start_date, start_override, "start date");
    override_opt(&mut config.data.end_date, end_override, "end date");

    let market = MarketData::load(&config)?;
    let (start, end) = market.date_range(
        config.data.start_date.as_deref(),
        config.data.end_date.as_deref(),
    )?;

    let simulator = TradeSimulator::new(config.simulation.clone())?;
    let source = signal::source_for(&config.scanner);
    let gate = market.gate();
    if !gate.is_enabled() {
        info!("Market-regime gate disabled (no index data)");
    }

    info!("Running backtest {} -> {}...", start, end);
    let result = simulator.run(&market.universe, &gate, source.as_ref(), start, end);

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS  {} -> {}", start, end);
    println!("{}", "=".repeat(60));
    println!("Starting Equity:    ${:.2}", config.simulation.starting_equity);
    match &result.metrics {
        Some(m) => {
            println!("Ending Equity:      ${:.2}", m.ending_equity);
            println!("Total Return:       {:.2}%", m.total_return * 100.0);
            println!("CAGR:               {:.2}%", m.cagr * 100.0);
            println!("Sharpe Ratio:       {:.2}", m.sharpe);
            println!("Max Drawdown:       {:.2}%", m.max_drawdown * 100.0);
            println!("Win Rate:           {:.2}%", m.win_rate);
            println!("Average R:          {:.2}", m.avg_r);
            println!("Expectancy (R):     {:.2}", m.expectancy);
            println!("Profit Factor:      {:.2}", m.profit_factor);
            println!("Total Trades:       {}", m.total_trades);
            println!("Total Commission:   ${:.2}", m.total_commission);
        }
        None => println!("No trades were taken in this period"),
    }
    println!("{}", "=".repeat(60));

    if let Some(dir) = output {
        let dir = Path::new(&dir);
        report::write_trades_csv(dir.join("trades.csv"), result.trades())?;
        report::write_equity_csv(dir.join("equity.csv"), result.equity_curve())?;
        println!("Trades and equity curve written to {}", dir.display());
    }

    info!("Backtest completed successfully");
    Ok(())
}
