//! # Schema Reconciliation
//!
//! Turns an arbitrary input table (one row synthesized from the quote form, or
//! an uploaded CSV) into exactly the frame a predictor expects.
//!
//! The order of operations matters:
//! 1. Project onto `feature_order`. Absent columns become all-null columns and
//!    extra columns are dropped.
//! 2. Type categorical columns as nullable text. Labels that look numeric (a
//!    trim level called "4") stay labels.
//! 3. Type numeric columns as Float64 with a non-strict cast, so unparseable
//!    values become null instead of failing the request.
//! 4. Batch uploads only: replace remaining numeric nulls with zero.

use crate::pool::{FeatureRows, FeatureValue};
use crate::predict::PredictError;
use crate::schema::{FeatureRole, FeatureSpec};
use itertools::Itertools;
use log::debug;
use ndarray::Array2;
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("Dataset missing required columns: {}", .0.iter().join(", "))]
    MissingColumns(Vec<String>),
}

/// What to do with numeric nulls left after coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImputePolicy {
    /// Leave them missing; the predictor decides.
    #[default]
    KeepMissing,
    /// Replace them with zero. Used for batch uploads only.
    ZeroFill,
}

/// A frame whose columns are exactly a spec's `feature_order`, typed by role.
#[derive(Debug, Clone)]
pub struct ReconciledTable {
    frame: DataFrame,
}

/// Fails when `raw` lacks any column of `feature_order`, naming every missing
/// column. Batch uploads run this before anything touches the network.
pub fn require_columns(raw: &DataFrame, spec: &FeatureSpec) -> Result<(), ReconcileError> {
    let missing: Vec<String> = spec
        .feature_order()
        .iter()
        .filter(|name| raw.get_column_index(name.as_str()).is_none())
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::MissingColumns(missing))
    }
}

/// Projects `raw` onto `spec` and types every column by its role.
pub fn reconcile(
    raw: &DataFrame,
    spec: &FeatureSpec,
    policy: ImputePolicy,
) -> Result<ReconciledTable, ReconcileError> {
    let height = raw.height();
    let mut columns: Vec<Column> = Vec::with_capacity(spec.feature_order().len());

    for name in spec.feature_order() {
        let role = spec.role_of(name).unwrap_or(FeatureRole::Numeric);
        let target = match role {
            FeatureRole::Categorical => DataType::String,
            FeatureRole::Numeric => DataType::Float64,
        };

        let source = match raw.get_column_index(name.as_str()) {
            Some(idx) => raw.get_columns()[idx].clone(),
            None => {
                debug!("Column '{name}' absent from input; filling with nulls.");
                Column::full_null(name.as_str().into(), height, &target)
            }
        };

        let typed = source.cast(&target)?;
        let typed = match (role, policy) {
            (FeatureRole::Numeric, ImputePolicy::ZeroFill) if typed.null_count() > 0 => {
                debug!(
                    "Column '{name}': replacing {} missing values with 0.",
                    typed.null_count()
                );
                typed
                    .as_materialized_series()
                    .fill_null(FillNullStrategy::Zero)?
                    .into_column()
            }
            _ => typed,
        };
        columns.push(typed);
    }

    let frame = DataFrame::new(columns)?;
    Ok(ReconciledTable { frame })
}

impl ReconciledTable {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_index(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    fn column(&self, name: &str) -> Result<&Column, PredictError> {
        self.frame
            .column(name)
            .map_err(|_| PredictError::MissingFeature(name.to_string()))
    }

    /// Reads `names` in order as feature rows, typing the columns listed in
    /// `categorical` as labels and everything else as numbers.
    pub fn feature_rows(
        &self,
        names: &[String],
        categorical: &[String],
    ) -> Result<FeatureRows, PredictError> {
        let mut flags = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());

        for name in names {
            let column = self.column(name)?;
            let is_categorical = categorical.contains(name);
            let values: Vec<FeatureValue> = if is_categorical {
                let text = column.cast(&DataType::String)?;
                text.as_materialized_series()
                    .str()?
                    .into_iter()
                    .map(|v| FeatureValue::Category(v.map(str::to_string)))
                    .collect()
            } else {
                let numbers = column.cast(&DataType::Float64)?;
                numbers
                    .as_materialized_series()
                    .f64()?
                    .into_iter()
                    .map(|v| FeatureValue::Number(v.filter(|x| !x.is_nan())))
                    .collect()
            };
            flags.push(is_categorical);
            columns.push(values);
        }

        FeatureRows::from_columns(names.to_vec(), flags, columns)
    }

    /// Reads `names` in order as a dense `[rows, features]` matrix with NaN for
    /// missing values. Text columns are rejected rather than parsed.
    pub fn numeric_matrix(&self, names: &[String]) -> Result<Array2<f64>, PredictError> {
        let mut matrix = Array2::from_elem((self.height(), names.len()), f64::NAN);

        for (j, name) in names.iter().enumerate() {
            let column = self.column(name)?;
            if column.dtype() == &DataType::String {
                return Err(PredictError::Incompatible(format!(
                    "column '{name}' holds text; a dense numeric matrix cannot represent it"
                )));
            }
            let numbers = column.cast(&DataType::Float64)?;
            for (i, value) in numbers.as_materialized_series().f64()?.into_iter().enumerate() {
                if let Some(v) = value {
                    matrix[[i, j]] = v;
                }
            }
        }

        Ok(matrix)
    }
}
