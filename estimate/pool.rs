//! Row-major feature values and the explicit-categorical input wrapper.
//!
//! A `FeaturePool` carries, next to the values, the feature names in model
//! order and which of them are categorical, for predictors that cannot work
//! out column roles on their own. Constructing one requires the `categorical-pool`
//! feature; without it the type still exists but cannot be built, and the
//! prediction fallback reports the missing component instead.

use crate::predict::PredictError;
#[cfg(feature = "categorical-pool")]
use crate::reconcile::ReconciledTable;

/// Name of the cargo feature that provides `FeaturePool::new`.
pub const POOL_FEATURE: &str = "categorical-pool";

/// One cell of a feature row.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(Option<f64>),
    Category(Option<String>),
}

/// Named, row-major feature values with a per-column categorical flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRows {
    names: Vec<String>,
    categorical: Vec<bool>,
    rows: Vec<Vec<FeatureValue>>,
}

impl FeatureRows {
    /// Builds rows from column-major data. Every column must have the same length.
    pub fn from_columns(
        names: Vec<String>,
        categorical: Vec<bool>,
        columns: Vec<Vec<FeatureValue>>,
    ) -> Result<Self, PredictError> {
        let height = columns.first().map_or(0, Vec::len);
        if let Some(bad) = columns.iter().position(|c| c.len() != height) {
            return Err(PredictError::Incompatible(format!(
                "column '{}' has {} values, expected {height}",
                names.get(bad).map_or("?", String::as_str),
                columns[bad].len()
            )));
        }

        let mut rows: Vec<Vec<FeatureValue>> =
            (0..height).map(|_| Vec::with_capacity(columns.len())).collect();
        for column in columns {
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }

        Ok(Self {
            names,
            categorical,
            rows,
        })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn is_categorical(&self, column: usize) -> bool {
        self.categorical.get(column).copied().unwrap_or(false)
    }

    pub fn rows(&self) -> &[Vec<FeatureValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Replaces missing numbers in `column` with `fill`.
    pub fn fill_missing_numbers(&mut self, column: usize, fill: f64) {
        for row in &mut self.rows {
            if let Some(FeatureValue::Number(value @ None)) = row.get_mut(column) {
                *value = Some(fill);
            }
        }
    }
}

/// Feature values plus explicit categorical-column and feature-name
/// declarations.
#[derive(Debug, Clone)]
pub struct FeaturePool {
    rows: FeatureRows,
}

#[cfg(feature = "categorical-pool")]
impl FeaturePool {
    /// Wraps `table`, reading `feature_names` in that order and typing the
    /// columns listed in `cat_features` as labels.
    pub fn new(
        table: &ReconciledTable,
        cat_features: &[String],
        feature_names: &[String],
    ) -> Result<Self, PredictError> {
        if let Some(stray) = cat_features.iter().find(|c| !feature_names.contains(*c)) {
            return Err(PredictError::Incompatible(format!(
                "categorical feature '{stray}' is not among the pool's feature names"
            )));
        }
        let rows = table.feature_rows(feature_names, cat_features)?;
        Ok(Self { rows })
    }
}

impl FeaturePool {
    pub fn rows(&self) -> &FeatureRows {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_transposed_into_rows() {
        let rows = FeatureRows::from_columns(
            vec!["Make".into(), "Year".into()],
            vec![true, false],
            vec![
                vec![
                    FeatureValue::Category(Some("Toyota".into())),
                    FeatureValue::Category(None),
                ],
                vec![FeatureValue::Number(Some(2015.0)), FeatureValue::Number(None)],
            ],
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.index_of("Year"), Some(1));
        assert!(rows.is_categorical(0));
        assert!(!rows.is_categorical(1));
        assert_eq!(
            rows.rows()[0],
            vec![
                FeatureValue::Category(Some("Toyota".into())),
                FeatureValue::Number(Some(2015.0)),
            ]
        );
        assert_eq!(
            rows.rows()[1],
            vec![FeatureValue::Category(None), FeatureValue::Number(None)]
        );
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let err = FeatureRows::from_columns(
            vec!["a".into(), "b".into()],
            vec![false, false],
            vec![
                vec![FeatureValue::Number(Some(1.0))],
                vec![FeatureValue::Number(Some(1.0)), FeatureValue::Number(None)],
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn fill_only_touches_missing_numbers() {
        let mut rows = FeatureRows::from_columns(
            vec!["Mileage".into()],
            vec![false],
            vec![vec![FeatureValue::Number(None), FeatureValue::Number(Some(5.0))]],
        )
        .unwrap();
        rows.fill_missing_numbers(0, 0.0);
        assert_eq!(rows.rows()[0][0], FeatureValue::Number(Some(0.0)));
        assert_eq!(rows.rows()[1][0], FeatureValue::Number(Some(5.0)));
    }
}
