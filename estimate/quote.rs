//! Shapes predictions for display: the single-vehicle quote with its
//! uncertainty band, and the batch table with an appended `Prediction` column.

use polars::prelude::*;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

pub const ENGINE_SIZE_RANGE: RangeInclusive<f64> = 1.0..=9.0;
pub const YEAR_RANGE: RangeInclusive<i64> = 2003..=2022;
pub const MILEAGE_RANGE: RangeInclusive<i64> = 0..=376_000;

/// Name of the column appended to batch uploads.
pub const PREDICTION_COLUMN: &str = "Prediction";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("{field} must be between {min} and {max}, got {value}.")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },
    #[error("{field} must not be empty.")]
    Blank { field: &'static str },
    #[error("Got {found} predictions for a table of {expected} rows.")]
    LengthMismatch { expected: usize, found: usize },
}

/// One vehicle as entered on the quote form.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRecord {
    pub make: String,
    pub vehicle_type: String,
    pub year: i64,
    pub origin: String,
    pub color: String,
    pub options: String,
    pub engine_size: f64,
    pub fuel_type: String,
    pub gear_type: String,
    pub mileage: i64,
    pub region: String,
}

impl VehicleRecord {
    /// Checks the numeric inputs against the form's bounds and rejects blank labels.
    pub fn validate(&self) -> Result<(), RecordError> {
        check_range("Engine_Size", self.engine_size, &ENGINE_SIZE_RANGE)?;
        check_range("Year", self.year, &YEAR_RANGE)?;
        check_range("Mileage", self.mileage, &MILEAGE_RANGE)?;
        for (field, value) in self.labels() {
            if value.trim().is_empty() {
                return Err(RecordError::Blank { field });
            }
        }
        Ok(())
    }

    /// The categorical fields paired with their column names.
    pub fn labels(&self) -> [(&'static str, &str); 8] {
        [
            ("Make", self.make.as_str()),
            ("Type", self.vehicle_type.as_str()),
            ("Origin", self.origin.as_str()),
            ("Color", self.color.as_str()),
            ("Options", self.options.as_str()),
            ("Fuel_Type", self.fuel_type.as_str()),
            ("Gear_Type", self.gear_type.as_str()),
            ("Region", self.region.as_str()),
        ]
    }

    /// A one-row frame with the record's fields as columns.
    pub fn to_frame(&self) -> Result<DataFrame, RecordError> {
        let frame = DataFrame::new(vec![
            Column::new("Make".into(), [self.make.as_str()]),
            Column::new("Type".into(), [self.vehicle_type.as_str()]),
            Column::new("Year".into(), [self.year]),
            Column::new("Origin".into(), [self.origin.as_str()]),
            Column::new("Color".into(), [self.color.as_str()]),
            Column::new("Options".into(), [self.options.as_str()]),
            Column::new("Engine_Size".into(), [self.engine_size]),
            Column::new("Fuel_Type".into(), [self.fuel_type.as_str()]),
            Column::new("Gear_Type".into(), [self.gear_type.as_str()]),
            Column::new("Mileage".into(), [self.mileage]),
            Column::new("Region".into(), [self.region.as_str()]),
        ])?;
        Ok(frame)
    }
}

fn check_range<T>(field: &'static str, value: T, range: &RangeInclusive<T>) -> Result<(), RecordError>
where
    T: PartialOrd + fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(RecordError::OutOfRange {
            field,
            value: value.to_string(),
            min: range.start().to_string(),
            max: range.end().to_string(),
        })
    }
}

/// A point estimate with a symmetric relative band around it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBand {
    pub estimate: f64,
    pub low: f64,
    pub high: f64,
    pub percent: u32,
}

impl PriceBand {
    pub fn around(estimate: f64, percent: u32) -> Self {
        let fraction = f64::from(percent) / 100.0;
        Self {
            estimate,
            low: estimate * (1.0 - fraction),
            high: estimate * (1.0 + fraction),
            percent,
        }
    }

    /// Renders the quote as three lines: estimate, band label, band.
    pub fn render(&self, currency: &str) -> String {
        format!(
            "{currency} {}\nEstimation (±{}%)\n{currency} {} - {}",
            format_thousands(self.estimate),
            self.percent,
            format_thousands(self.low),
            format_thousands(self.high)
        )
    }
}

/// Rounds to the nearest whole unit and groups digits in threes with commas.
pub fn format_thousands(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Rounds half away from zero. Non-finite predictions stay missing.
pub fn round_prediction(value: f64) -> Option<i64> {
    value.is_finite().then(|| value.round() as i64)
}

/// Appends (or replaces) the integer `Prediction` column on the uploaded table,
/// leaving every other column and the row order untouched.
pub fn append_predictions(mut frame: DataFrame, predictions: &[f64]) -> Result<DataFrame, RecordError> {
    if predictions.len() != frame.height() {
        return Err(RecordError::LengthMismatch {
            expected: frame.height(),
            found: predictions.len(),
        });
    }
    let rounded: Vec<Option<i64>> = predictions.iter().copied().map(round_prediction).collect();
    frame.with_column(Column::new(PREDICTION_COLUMN.into(), rounded))?;
    Ok(frame)
}
