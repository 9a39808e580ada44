//! # Predictor Invocation
//!
//! A loaded artifact is either a full pipeline that accepts the reconciled
//! table as is, or a bare boosted-tree model that needs the categorical columns
//! declared explicitly through a `FeaturePool`. The caller cannot tell which
//! without trying, so the first request probes: the generic tabular entry point
//! first, the pool entry point if that fails for any reason. Whichever path
//! succeeds is remembered on the engine and used directly from then on.

use crate::pool::FeaturePool;
use crate::reconcile::ReconciledTable;
use crate::schema::FeatureSpec;
use log::{debug, info};
use polars::prelude::PolarsError;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("The predictor rejected its input: {0}")]
    Incompatible(String),
    #[error("The predictor needs the feature '{0}', which the input does not provide.")]
    MissingFeature(String),
    #[error(
        "The model needs explicit categorical declarations, but this build lacks the '{0}' component. Rebuild with `--features {0}`."
    )]
    MissingDependency(&'static str),
    #[error("The predictor returned {found} values for {expected} input rows.")]
    RowCountMismatch { expected: usize, found: usize },
}

/// The two invocation paths a predictor may support.
pub trait Predictor: Send + Sync {
    /// Generic tabular entry point, fed the reconciled frame directly.
    fn predict_table(&self, table: &ReconciledTable) -> Result<Vec<f64>, PredictError>;

    /// Entry point for inputs that carry explicit categorical declarations.
    fn predict_pool(&self, pool: &FeaturePool) -> Result<Vec<f64>, PredictError>;

    /// Short human-readable description, shown with batch results.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Which entry point a predictor instance turned out to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    GenericTabular,
    ExplicitCategorical,
}

/// A predictor plus the cached outcome of its capability probe.
pub struct PredictionEngine {
    predictor: Box<dyn Predictor>,
    kind: OnceLock<PredictorKind>,
}

impl std::fmt::Debug for PredictionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionEngine")
            .field("predictor", &self.predictor.describe())
            .field("kind", &self.kind.get())
            .finish()
    }
}

impl PredictionEngine {
    pub fn new(predictor: Box<dyn Predictor>) -> Self {
        Self {
            predictor,
            kind: OnceLock::new(),
        }
    }

    /// The probed kind, or `None` before the first successful prediction.
    pub fn kind(&self) -> Option<PredictorKind> {
        self.kind.get().copied()
    }

    pub fn describe(&self) -> String {
        self.predictor.describe()
    }

    /// One prediction per row of `table`, in row order.
    pub fn predict(
        &self,
        table: &ReconciledTable,
        spec: &FeatureSpec,
    ) -> Result<Vec<f64>, PredictError> {
        let values = match self.kind.get() {
            Some(PredictorKind::GenericTabular) => self.predictor.predict_table(table)?,
            Some(PredictorKind::ExplicitCategorical) => self.predict_with_pool(table, spec)?,
            None => self.probe(table, spec)?,
        };

        if values.len() != table.height() {
            return Err(PredictError::RowCountMismatch {
                expected: table.height(),
                found: values.len(),
            });
        }
        Ok(values)
    }

    fn probe(&self, table: &ReconciledTable, spec: &FeatureSpec) -> Result<Vec<f64>, PredictError> {
        match self.predictor.predict_table(table) {
            Ok(values) => {
                self.remember(PredictorKind::GenericTabular);
                Ok(values)
            }
            Err(primary) => {
                debug!("Generic tabular prediction failed ({primary}); retrying with a feature pool.");
                let values = self.predict_with_pool(table, spec)?;
                self.remember(PredictorKind::ExplicitCategorical);
                Ok(values)
            }
        }
    }

    fn remember(&self, kind: PredictorKind) {
        if self.kind.set(kind).is_ok() {
            info!("Predictor kind resolved: {kind:?}.");
        }
    }

    fn predict_with_pool(
        &self,
        table: &ReconciledTable,
        spec: &FeatureSpec,
    ) -> Result<Vec<f64>, PredictError> {
        let pool = build_pool(table, spec)?;
        self.predictor.predict_pool(&pool)
    }
}

#[cfg(feature = "categorical-pool")]
fn build_pool(table: &ReconciledTable, spec: &FeatureSpec) -> Result<FeaturePool, PredictError> {
    let cat_features: Vec<String> = spec
        .categorical_columns()
        .iter()
        .filter(|c| table.has_column(c))
        .cloned()
        .collect();
    FeaturePool::new(table, &cat_features, spec.feature_order())
}

#[cfg(not(feature = "categorical-pool"))]
fn build_pool(table: &ReconciledTable, spec: &FeatureSpec) -> Result<FeaturePool, PredictError> {
    debug!(
        "Cannot wrap {} rows x {} features in a feature pool.",
        table.height(),
        spec.feature_order().len()
    );
    Err(PredictError::MissingDependency(crate::pool::POOL_FEATURE))
}
