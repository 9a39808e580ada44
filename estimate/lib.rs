#![deny(unused_variables)]
pub mod pipeline;
pub mod pool;
pub mod predict;
pub mod quote;
pub mod reconcile;
pub mod schema;

#[path = "../artifact/mod.rs"]
pub mod artifact;

#[path = "../overview/mod.rs"]
pub mod overview;

#[path = "../shared/config.rs"]
pub mod config;

pub use artifact::{ArtifactLoader, LoadError};
pub use pipeline::{EstimateError, Estimator};
pub use predict::{PredictionEngine, Predictor, PredictorKind};
pub use quote::{PriceBand, VehicleRecord};
pub use reconcile::{ImputePolicy, ReconciledTable, reconcile, require_columns};
pub use schema::FeatureSpec;
