//! # Report
//!
//! Tabular views of optimized weights, metrics and the sampled frontier. Rounding here is for
//! display only; the underlying results keep full precision.

use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;
use serde::Deserialize;
use serde::Serialize;

use super::types::PortfolioMetrics;
use super::types::SampleSet;
use crate::error::PortfolioError;
use crate::error::Result;

/// Decimal places used for displayed weights.
pub const DISPLAY_DECIMALS: i32 = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
  pub asset: String,
  pub weight: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontierRow {
  pub volatility: f64,
  #[serde(rename = "return")]
  pub expected_return: f64,
  pub sharpe: f64,
}

fn round_to(value: f64, decimals: i32) -> f64 {
  let scale = 10f64.powi(decimals);
  (value * scale).round() / scale
}

/// One `(asset, weight)` row per asset, weights rounded to `decimals` places.
pub fn weight_rows(assets: &[String], weights: &[f64], decimals: i32) -> Result<Vec<WeightRow>> {
  if assets.len() != weights.len() {
    return Err(PortfolioError::DimensionMismatch {
      expected: assets.len(),
      actual: weights.len(),
    });
  }

  Ok(
    assets
      .iter()
      .zip(weights)
      .map(|(asset, &w)| WeightRow {
        asset: asset.clone(),
        weight: round_to(w, decimals),
      })
      .collect(),
  )
}

pub fn weight_table(rows: &[WeightRow]) -> Table {
  let mut table = Table::new();
  table.set_titles(Row::new(vec![Cell::new("Asset"), Cell::new("Weight")]));
  for row in rows {
    table.add_row(Row::new(vec![
      Cell::new(&row.asset),
      Cell::new(&format!("{:.*}", DISPLAY_DECIMALS as usize, row.weight)),
    ]));
  }
  table
}

pub fn metrics_table(metrics: &PortfolioMetrics) -> Table {
  let mut table = Table::new();
  table.set_titles(Row::new(vec![
    Cell::new("Return"),
    Cell::new("Volatility"),
    Cell::new("Sharpe"),
  ]));
  table.add_row(Row::new(vec![
    Cell::new(&format!("{:.2}%", metrics.annualized_return * 100.0)),
    Cell::new(&format!("{:.2}%", metrics.annualized_volatility * 100.0)),
    Cell::new(&format!("{:.2}", metrics.sharpe_ratio)),
  ]));
  table
}

/// Pareto-efficient sampled points in volatility order.
pub fn frontier_rows(samples: &SampleSet) -> Vec<FrontierRow> {
  samples
    .frontier()
    .into_iter()
    .map(|s| FrontierRow {
      volatility: s.metrics.annualized_volatility,
      expected_return: s.metrics.annualized_return,
      sharpe: s.metrics.sharpe_ratio,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn weights_round_for_display() {
    let assets = vec!["AAPL".to_string(), "MSFT".to_string()];
    let rows = weight_rows(&assets, &[0.123456, 0.876544], DISPLAY_DECIMALS).unwrap();

    assert_eq!(rows[0].weight, 0.1235);
    assert_eq!(rows[1].weight, 0.8765);
    assert!(weight_rows(&assets, &[1.0], DISPLAY_DECIMALS).is_err());

    let rendered = weight_table(&rows).to_string();
    assert!(rendered.contains("AAPL"));
    assert!(rendered.contains("0.1235"));
  }

  #[test]
  fn weight_rows_serialize_as_csv() {
    let assets = vec!["AAPL".to_string(), "MSFT".to_string()];
    let rows = weight_rows(&assets, &[0.123456, 0.876544], DISPLAY_DECIMALS).unwrap();

    let mut writer = csv::Writer::from_writer(vec![]);
    for row in &rows {
      writer.serialize(row).unwrap();
    }
    let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();

    assert_eq!(out, "asset,weight\nAAPL,0.1235\nMSFT,0.8765\n");
  }

  #[test]
  fn metrics_render_as_percentages() {
    let table = metrics_table(&PortfolioMetrics {
      annualized_return: 0.1834,
      annualized_volatility: 0.2211,
      sharpe_ratio: 0.8295,
    })
    .to_string();

    assert!(table.contains("18.34%"));
    assert!(table.contains("22.11%"));
    assert!(table.contains("0.83"));
  }
}
