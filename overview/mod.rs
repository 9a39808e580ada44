//! # Data Overview
//!
//! Summaries of a listings table: quick price statistics and average price per
//! category level. Prices arrive as free text ("SAR 45.000", "1.234.567,89")
//! and are normalized before anything is computed.

pub mod catalog;

use log::{info, warn};
use polars::prelude::*;
use std::path::Path;
use thiserror::Error;

/// Category columns that are summarized when present.
pub const CATEGORY_COLUMNS: [&str; 8] = [
    "Type",
    "Region",
    "Make",
    "Gear_Type",
    "Origin",
    "Options",
    "Color",
    "Fuel_Type",
];

pub const PRICE_COLUMN: &str = "Price";
pub const COUNT_COLUMN: &str = "Count";
pub const PREVIEW_ROWS: usize = 12;
pub const TOP_COUNTS: usize = 20;
/// Most category levels shown in the averages chart.
pub const CHART_LIMIT: usize = 200;

#[derive(Error, Debug)]
pub enum OverviewError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("The Price column is required to build a summary.")]
    MissingPrice,
    #[error("'{0}' is not an available category column.")]
    UnknownCategory(String),
}

/// Parses a free-text price.
///
/// Only digits, `,`, `.` and `-` are kept. A `.` followed by exactly three
/// digits and then a non-digit or the end is a thousands separator and is
/// dropped; any `,` left is read as the decimal point.
pub fn normalize_price(raw: &str) -> Option<f64> {
    let kept: Vec<u8> = raw
        .bytes()
        .filter(|b| b.is_ascii_digit() || matches!(b, b',' | b'.' | b'-'))
        .collect();

    let mut cleaned = Vec::with_capacity(kept.len());
    for (i, &b) in kept.iter().enumerate() {
        if b == b'.' && is_thousands_dot(&kept, i) {
            continue;
        }
        cleaned.push(if b == b',' { b'.' } else { b });
    }

    lexical_core::parse::<f64>(&cleaned).ok()
}

fn is_thousands_dot(bytes: &[u8], dot: usize) -> bool {
    let group = &bytes[dot + 1..];
    group.len() >= 3
        && group[..3].iter().all(u8::is_ascii_digit)
        && group.get(3).is_none_or(|b| !b.is_ascii_digit())
}

/// A listings table with a numeric `Price` and no rows lacking one.
#[derive(Debug, Clone)]
pub struct PriceTable {
    frame: DataFrame,
    dropped_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuickStats {
    pub rows: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Sample standard deviation; zero when undefined.
    pub std: f64,
}

/// Average price and row count per level of one category column.
#[derive(Debug, Clone)]
pub struct CategorySummary {
    pub category: String,
    /// Sorted by `Price`, highest first.
    pub averages: DataFrame,
    /// Sorted by `Count`, highest first.
    pub counts: DataFrame,
}

impl PriceTable {
    pub fn from_csv(path: &Path) -> Result<Self, OverviewError> {
        let frame = crate::pipeline::read_csv_table(path)?;
        info!("Read {} rows from {}.", frame.height(), path.display());
        Self::prepare(frame)
    }

    /// Trims header names, normalizes `Price` and drops rows without a valid one.
    pub fn prepare(mut frame: DataFrame) -> Result<Self, OverviewError> {
        let trimmed: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.trim().to_string())
            .collect();
        frame.set_column_names(trimmed)?;

        let price = frame
            .column(PRICE_COLUMN)
            .map_err(|_| OverviewError::MissingPrice)?
            .cast(&DataType::String)?;
        let parsed: Float64Chunked = price
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|value| value.and_then(normalize_price))
            .collect();
        frame.with_column(parsed.with_name(PRICE_COLUMN.into()).into_series())?;

        let dropped_rows = frame.column(PRICE_COLUMN)?.null_count();
        if dropped_rows > 0 {
            warn!("{dropped_rows} rows have an invalid Price and will be ignored.");
            let valid = frame
                .column(PRICE_COLUMN)?
                .as_materialized_series()
                .is_not_null();
            frame = frame.filter(&valid)?;
        }

        Ok(Self {
            frame,
            dropped_rows,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn preview(&self) -> DataFrame {
        self.frame.head(Some(PREVIEW_ROWS))
    }

    /// The known category columns present in the table, in summary order.
    pub fn available_categories(&self) -> Vec<&'static str> {
        CATEGORY_COLUMNS
            .into_iter()
            .filter(|c| self.frame.get_column_index(c).is_some())
            .collect()
    }

    pub fn quick_stats(&self) -> Result<QuickStats, OverviewError> {
        let price = self.frame.column(PRICE_COLUMN)?.as_materialized_series();
        let std = price.std(1).filter(|v| v.is_finite()).unwrap_or(0.0);
        Ok(QuickStats {
            rows: self.frame.height(),
            mean: price.mean(),
            median: price.median(),
            std,
        })
    }

    pub fn summarize(&self, category: &str) -> Result<CategorySummary, OverviewError> {
        if !self.available_categories().contains(&category) {
            return Err(OverviewError::UnknownCategory(category.to_string()));
        }

        let grouped = || {
            self.frame
                .clone()
                .lazy()
                .filter(col(category).is_not_null())
                .group_by([col(category)])
        };

        let averages = grouped()
            .agg([col(PRICE_COLUMN).mean().alias(PRICE_COLUMN)])
            .sort(
                [PRICE_COLUMN, category],
                SortMultipleOptions::default().with_order_descending_multi([true, false]),
            )
            .collect()?;

        let counts = grouped()
            .agg([len().alias(COUNT_COLUMN)])
            .sort(
                [COUNT_COLUMN, category],
                SortMultipleOptions::default().with_order_descending_multi([true, false]),
            )
            .collect()?;

        Ok(CategorySummary {
            category: category.to_string(),
            averages,
            counts,
        })
    }
}

impl CategorySummary {
    pub fn levels(&self) -> usize {
        self.averages.height()
    }

    pub fn is_truncated(&self) -> bool {
        self.levels() > CHART_LIMIT
    }

    pub fn chart_rows(&self) -> DataFrame {
        self.averages.head(Some(CHART_LIMIT))
    }

    pub fn top_counts(&self) -> DataFrame {
        self.counts.head(Some(TOP_COUNTS))
    }

    pub fn export_file_name(&self) -> String {
        format!("avg_price_by_{}.csv", self.category)
    }

    /// Writes the full averages table into `dir` and returns the file path.
    pub fn export(&self, dir: &Path) -> Result<std::path::PathBuf, OverviewError> {
        let path = dir.join(self.export_file_name());
        let mut averages = self.averages.clone();
        crate::pipeline::write_csv_table(&mut averages, &path)?;
        Ok(path)
    }
}
