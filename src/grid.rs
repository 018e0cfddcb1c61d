//! Parameter grid for walk-forward optimization
//!
//! A grid maps option names to the values to try. Combinations are produced
//! in a fixed order (sorted keys, last key varying fastest) and applied onto
//! the scanner and simulation settings by name.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::warn;

use crate::config::{ScannerConfig, SimulationConfig};
use crate::error::{CoreError, CoreResult};

pub type Grid = HashMap<String, Vec<Value>>;

/// One grid cell: option name -> value
pub type ParameterSet = BTreeMap<String, Value>;

/// All combinations of the grid, in grid order.
///
/// No grid (or an empty one) yields a single empty set, i.e. the base settings.
pub fn parameter_sets(grid: Option<&Grid>) -> Vec<ParameterSet> {
    let grid = match grid {
        Some(g) if !g.is_empty() => g,
        _ => return vec![ParameterSet::new()],
    };

    let mut keys: Vec<&String> = grid.keys().collect();
    keys.sort();
    let values: Vec<&Vec<Value>> = keys.iter().map(|k| &grid[*k]).collect();

    cartesian_product_indices(&values)
        .into_iter()
        .map(|indices| {
            keys.iter()
                .zip(indices)
                .enumerate()
                .map(|(i, (key, idx))| ((*key).clone(), values[i][idx].clone()))
                .collect::<ParameterSet>()
        })
        .collect()
}

/// Cartesian product as index vectors, odometer order
fn cartesian_product_indices(arrays: &[&Vec<Value>]) -> Vec<Vec<usize>> {
    if arrays.is_empty() {
        return vec![vec![]];
    }
    if arrays.iter().any(|a| a.is_empty()) {
        return vec![];
    }

    let mut result = Vec::new();
    let mut indices = vec![0usize; arrays.len()];

    loop {
        result.push(indices.clone());

        let mut pos = arrays.len() - 1;
        loop {
            indices[pos] += 1;
            if indices[pos] < arrays[pos].len() {
                break;
            }
            indices[pos] = 0;
            if pos == 0 {
                return result;
            }
            pos -= 1;
        }
    }
}

pub fn total_combinations(grid: Option<&Grid>) -> usize {
    match grid {
        Some(g) if !g.is_empty() => g.values().map(|v| v.len()).product(),
        _ => 1,
    }
}

// =============================================================================
// Applying a cell onto the settings
// =============================================================================

/// Apply `params` onto copies of the base settings.
///
/// Keys name a scanner or simulation option (`vol_multiplier`,
/// `cooldown_days`), optionally prefixed with the section (`simulation.kelly_fraction`)
/// or pointing into a nested option (`exit_multiples.stop`). Unknown keys, values of
/// the wrong type and settings that fail validation are `ConfigurationInvalid`.
pub fn apply_parameters(
    scanner: &ScannerConfig,
    simulation: &SimulationConfig,
    params: &ParameterSet,
) -> CoreResult<(ScannerConfig, SimulationConfig)> {
    if params.is_empty() {
        return Ok((scanner.clone(), simulation.clone()));
    }

    let mut scanner_value = to_value(scanner)?;
    let mut simulation_value = to_value(simulation)?;

    for (key, value) in params {
        let mut path: Vec<&str> = key.split('.').collect();
        let first = path[0];
        let target = match first {
            "scanner" if path.len() > 1 => {
                path.remove(0);
                &mut scanner_value
            }
            "simulation" if path.len() > 1 => {
                path.remove(0);
                &mut simulation_value
            }
            _ if scanner_value.get(first).is_some() => &mut scanner_value,
            _ if simulation_value.get(first).is_some() => &mut simulation_value,
            _ => {
                return Err(CoreError::ConfigurationInvalid(format!(
                    "unknown grid parameter '{}'",
                    key
                )))
            }
        };
        set_path(target, &path, value.clone())
            .map_err(|e| CoreError::ConfigurationInvalid(format!("grid parameter '{}': {}", key, e)))?;
    }

    let scanner: ScannerConfig = from_value(scanner_value)?;
    let simulation: SimulationConfig = from_value(simulation_value)?;
    scanner.validate()?;
    simulation.validate()?;
    Ok((scanner, simulation))
}

/// Check every grid key and value up front, before any simulation runs
pub fn validate_grid(
    grid: &Grid,
    scanner: &ScannerConfig,
    simulation: &SimulationConfig,
) -> CoreResult<()> {
    for (key, values) in grid {
        if values.is_empty() {
            return Err(CoreError::ConfigurationInvalid(format!(
                "grid parameter '{}' has no values",
                key
            )));
        }
        for value in values {
            let params = ParameterSet::from([(key.clone(), value.clone())]);
            apply_parameters(scanner, simulation, &params)?;
        }
    }
    Ok(())
}

fn set_path(target: &mut Value, path: &[&str], value: Value) -> Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Err("empty key".to_string());
    };
    let mut node = target;
    for part in parents {
        node = node
            .get_mut(*part)
            .filter(|v| v.is_object())
            .ok_or_else(|| format!("'{}' is not a settings group", part))?;
    }
    let slot = node
        .get_mut(*last)
        .ok_or_else(|| format!("unknown option '{}'", last))?;
    *slot = value;
    Ok(())
}

fn to_value<T: serde::Serialize>(config: &T) -> CoreResult<Value> {
    serde_json::to_value(config).map_err(|e| CoreError::ConfigurationInvalid(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> CoreResult<T> {
    serde_json::from_value(value).map_err(|e| CoreError::ConfigurationInvalid(e.to_string()))
}

// =============================================================================
// CLI overrides and reporting
// =============================================================================

/// Parse CLI override into grid format
/// Format: "param=val1,val2,val3" or "param=1.0,2.0,3.0"
pub fn parse_grid_override(s: &str) -> Option<(String, Vec<Value>)> {
    let (key, raw) = s.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let values: Vec<Value> = raw
        .split(',')
        .filter_map(|v| {
            let v = v.trim();
            if let Ok(n) = v.parse::<i64>() {
                Some(serde_json::json!(n))
            } else if let Ok(n) = v.parse::<f64>() {
                Some(serde_json::json!(n))
            } else if v == "true" || v == "false" {
                Some(Value::Bool(v == "true"))
            } else if v == "null" {
                Some(Value::Null)
            } else if !v.is_empty() {
                Some(serde_json::json!(v))
            } else {
                None
            }
        })
        .collect();

    if values.is_empty() {
        None
    } else {
        Some((key.to_string(), values))
    }
}

/// Merge CLI overrides into the grid; an override replaces the key's values
pub fn apply_overrides(grid: &mut Option<Grid>, overrides: &[String]) {
    for override_str in overrides {
        match parse_grid_override(override_str) {
            Some((key, values)) => {
                grid.get_or_insert_with(HashMap::new).insert(key, values);
            }
            None => warn!("Ignoring malformed override '{}'", override_str),
        }
    }
}

/// `key=value` pairs in key order, for logs and reports
pub fn format_params(params: &ParameterSet) -> String {
    if params.is_empty() {
        return "base".to_string();
    }
    params
        .iter()
        .map(|(k, v)| match v.as_f64() {
            Some(n) if v.is_f64() && n.fract() != 0.0 => format!("{}={:.4}", k, n)
                .trim_end_matches('0')
                .to_string(),
            _ => format!("{}={}", k, v),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
