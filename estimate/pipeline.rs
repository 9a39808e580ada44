//! # Request Orchestration
//!
//! Collect input, reconcile it, obtain the predictor (loading it on first
//! use), predict, shape the result. Every failure along the way ends up as one
//! `EstimateError`, which the caller turns into a single message.

use crate::artifact::fetch::{SourceTransport, Transport};
use crate::artifact::{ArtifactLoader, LoadError};
use crate::config::{AppConfig, ConfigError};
use crate::overview::catalog::CatalogError;
use crate::overview::OverviewError;
use crate::predict::{PredictError, PredictionEngine};
use crate::quote::{PriceBand, RecordError, VehicleRecord, append_predictions};
use crate::reconcile::{ImputePolicy, ReconcileError, reconcile, require_columns};
use crate::schema::{FeatureSpec, SchemaError};
use log::info;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Overview(#[from] OverviewError),
    #[error("Could not read or write the table: {0}")]
    Table(#[from] PolarsError),
    #[error("The predictor returned no value for the vehicle.")]
    EmptyPrediction,
}

impl EstimateError {
    /// One human-readable line for the person who triggered the request.
    pub fn user_message(&self) -> String {
        match self {
            EstimateError::Load(LoadError::WrongArtifact { .. }) => format!(
                "{self} Point the model source at the raw file download, not at the page that displays it."
            ),
            EstimateError::Load(LoadError::Transport(_)) => {
                format!("{self} Check the model URL and your connection, then try again.")
            }
            _ => self.to_string(),
        }
    }
}

/// Quotes one vehicle with an already-loaded engine.
pub fn quote_with(
    engine: &PredictionEngine,
    spec: &FeatureSpec,
    record: &VehicleRecord,
    band_percent: u32,
) -> Result<PriceBand, EstimateError> {
    let table = reconcile(&record.to_frame()?, spec, ImputePolicy::KeepMissing)?;
    let predictions = engine.predict(&table, spec)?;
    let estimate = predictions
        .first()
        .copied()
        .ok_or(EstimateError::EmptyPrediction)?;
    Ok(PriceBand::around(estimate, band_percent))
}

/// Predicts every row of `upload` and returns it with a `Prediction` column.
pub fn predict_batch_with(
    engine: &PredictionEngine,
    spec: &FeatureSpec,
    upload: DataFrame,
) -> Result<DataFrame, EstimateError> {
    let table = reconcile(&upload, spec, ImputePolicy::ZeroFill)?;
    let predictions = engine.predict(&table, spec)?;
    Ok(append_predictions(upload, &predictions)?)
}

/// A CSV file with a header row. Column types are inferred from every row, so
/// a stray label deep in a numeric column yields a text column rather than a
/// parse failure.
pub fn read_csv_table(path: &Path) -> PolarsResult<DataFrame> {
    CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None),
        )
        .finish()
}

pub fn write_csv_table(frame: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(frame)
}

/// Configuration, the resolved feature schema and the artifact loader for one
/// process.
pub struct Estimator<T: Transport = SourceTransport> {
    config: AppConfig,
    spec: FeatureSpec,
    loader: ArtifactLoader<T>,
}

impl Estimator<SourceTransport> {
    pub fn from_config(config: AppConfig) -> Result<Self, EstimateError> {
        config.validate()?;
        let (spec, origin) =
            FeatureSpec::resolve(&config.feature_names_path, &config.categorical_columns_path)?;
        info!("Using {origin:?} feature schema.");
        let loader = ArtifactLoader::from_settings(&config.expected_sha256, config.timeout())?;
        Ok(Self::with_loader(config, spec, loader))
    }
}

impl<T: Transport> Estimator<T> {
    pub fn with_loader(config: AppConfig, spec: FeatureSpec, loader: ArtifactLoader<T>) -> Self {
        Self {
            config,
            spec,
            loader,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// The predictor for the configured source, loaded on first use.
    pub fn engine(&self) -> Result<Arc<PredictionEngine>, EstimateError> {
        let source = self.config.model_source()?;
        Ok(self.loader.load(source)?)
    }

    /// Validates the record before anything is downloaded.
    pub fn quote(&self, record: &VehicleRecord) -> Result<PriceBand, EstimateError> {
        record.validate()?;
        let engine = self.engine()?;
        quote_with(&engine, &self.spec, record, self.config.band_percent)
    }

    /// Rejects uploads that lack a required column before anything is downloaded.
    pub fn predict_batch(&self, upload: DataFrame) -> Result<DataFrame, EstimateError> {
        require_columns(&upload, &self.spec)?;
        let engine = self.engine()?;
        predict_batch_with(&engine, &self.spec, upload)
    }
}
