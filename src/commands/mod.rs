//! Command implementations

pub mod backtest;
pub mod scan;
pub mod walk_forward;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::info;

use momentum_scanner::regime::MarketRegimeGate;
use momentum_scanner::{data, AppConfig, EntryRule, PriceBar, Symbol};

/// Load the config file (or defaults) and apply the `--aggressive` preset
pub fn load_config(path: Option<&str>, aggressive: bool) -> Result<AppConfig> {
    let mut config = match path {
        Some(p) => {
            let config = AppConfig::from_file(p)?;
            info!("Loaded configuration from: {}", p);
            config
        }
        None => {
            info!("No config file given, using defaults");
            AppConfig::default()
        }
    };

    if aggressive {
        info!("Using aggressive scanner settings");
        config.scanner = config.scanner.with_aggressive();
    }

    config.validate().context("Configuration rejected")?;
    Ok(config)
}

/// Apply `--entry-rule`, leaving the configured rule when absent
pub fn override_entry_rule(config: &mut AppConfig, rule: Option<String>) -> Result<()> {
    if let Some(name) = rule {
        config.scanner.entry_rule = name.parse::<EntryRule>().map_err(anyhow::Error::msg)?;
    }
    info!("Entry rule: {}", config.scanner.entry_rule);
    Ok(())
}

pub struct MarketData {
    pub universe: BTreeMap<Symbol, Vec<PriceBar>>,
    pub index: Vec<PriceBar>,
}

impl MarketData {
    pub fn load(config: &AppConfig) -> Result<Self> {
        let symbols = config.data.symbols();
        if symbols.is_empty() {
            anyhow::bail!("No symbols configured (data.symbols)");
        }
        info!("Loading data from: {}", config.data.data_dir);
        let universe = data::load_universe(&config.data.data_dir, &symbols, &config.data.timeframe)?;
        info!("Loaded data for {} symbols", universe.len());

        let index = match &config.data.index_symbol {
            Some(sym) => {
                data::load_index(&config.data.data_dir, &Symbol::new(sym), &config.data.timeframe)?
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };

        Ok(MarketData { universe, index })
    }

    pub fn gate(&self) -> MarketRegimeGate {
        MarketRegimeGate::new(self.index.clone())
    }

    /// Configured `[start, end]`, defaulting to the span of the loaded bars
    pub fn date_range(&self, start: Option<&str>, end: Option<&str>) -> Result<(NaiveDate, NaiveDate)> {
        let (first, last) = momentum_scanner::optimizer::date_span(&self.universe)
            .context("Loaded data has no bars")?;
        let start = start.map(data::parse_date).transpose()?.unwrap_or(first);
        let end = end.map(data::parse_date).transpose()?.unwrap_or(last);
        if end < start {
            anyhow::bail!("End date {} is before start date {}", end, start);
        }
        Ok((start, end))
    }
}

/// Override a config value from the command line when given
pub fn override_opt(target: &mut Option<String>, value: Option<String>, what: &str) {
    if let Some(v) = value {
        info!("Overriding {} to: {}", what, v);
        *target = Some(v);
    }
}
