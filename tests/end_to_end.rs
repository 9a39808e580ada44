use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use carprice::artifact::fetch::{FetchedArtifact, Transport, sha256_hex};
use carprice::artifact::{ArtifactLoader, DEFAULT_TIMEOUT, LoadError};
use carprice::config::AppConfig;
use carprice::reconcile::ReconcileError;
use carprice::schema::{DEFAULT_CATEGORICAL_COLUMNS, DEFAULT_FEATURE_ORDER};
use carprice::{EstimateError, Estimator, FeatureSpec, PredictorKind, VehicleRecord};
use polars::prelude::*;
use serde_json::json;
use tempfile::tempdir;

/// Serves one fixed payload and counts how often it was asked to.
struct CountingTransport {
    body: Vec<u8>,
    calls: Arc<AtomicUsize>,
}

impl Transport for CountingTransport {
    fn fetch(&self, _: &str) -> Result<FetchedArtifact, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedArtifact {
            content_type: Some("application/octet-stream".to_string()),
            body: self.body.clone(),
        })
    }
}

/// A bare ensemble over the full used-car schema. With categorical features
/// declared it only accepts an explicit feature pool.
fn bare_ensemble(base_score: f64, trees: serde_json::Value) -> Vec<u8> {
    json!({
        "kind": "ensemble",
        "feature_names": DEFAULT_FEATURE_ORDER,
        "cat_features": DEFAULT_CATEGORICAL_COLUMNS,
        "base_score": base_score,
        "trees": trees,
    })
    .to_string()
    .into_bytes()
}

/// Splits on Mileage (feature 9): < 1500, < 2500, the rest.
fn mileage_steps() -> Vec<u8> {
    bare_ensemble(
        0.0,
        json!([{ "nodes": [
            {"type": "numeric", "feature": 9, "threshold": 1500.0, "left": 1, "right": 2},
            {"type": "leaf", "value": 10000.0},
            {"type": "numeric", "feature": 9, "threshold": 2500.0, "left": 3, "right": 4},
            {"type": "leaf", "value": 20000.5},
            {"type": "leaf", "value": 30000.49}
        ]}]),
    )
}

fn estimator(body: Vec<u8>) -> (Estimator<CountingTransport>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = CountingTransport {
        body,
        calls: Arc::clone(&calls),
    };
    let config = AppConfig {
        model_url: "https://models.example/usedcars.json".to_string(),
        ..AppConfig::default()
    };
    let loader = ArtifactLoader::new(transport, &config.expected_sha256, DEFAULT_TIMEOUT);
    (
        Estimator::with_loader(config, FeatureSpec::builtin(), loader),
        calls,
    )
}

fn camry() -> VehicleRecord {
    VehicleRecord {
        make: "Toyota".into(),
        vehicle_type: "Camry".into(),
        year: 2015,
        origin: "Gulf".into(),
        color: "White".into(),
        options: "Full".into(),
        engine_size: 2.5,
        fuel_type: "Gasoline".into(),
        gear_type: "Automatic".into(),
        mileage: 80_000,
        region: "Riyadh".into(),
    }
}

fn upload(with_region: bool) -> DataFrame {
    let mut columns = vec![
        Column::new("Listing".into(), ["L-1", "L-2", "L-3"]),
        Column::new("Make".into(), ["Toyota", "Hyundai", "Ford"]),
        Column::new("Type".into(), ["Camry", "Accent", "Taurus"]),
        Column::new("Year".into(), [2015i64, 2019, 2012]),
        Column::new("Origin".into(), ["Gulf", "Saudi", "Other"]),
        Column::new("Color".into(), ["White", "Silver", "Black"]),
        Column::new("Options".into(), ["Full", "Standard", "Semi Full"]),
        Column::new("Engine_Size".into(), [2.5f64, 1.6, 3.5]),
        Column::new("Fuel_Type".into(), ["Gasoline", "Gasoline", "Gasoline"]),
        Column::new("Gear_Type".into(), ["Automatic", "Automatic", "Manual"]),
        Column::new("Mileage".into(), [1000i64, 2000, 3000]),
    ];
    if with_region {
        columns.push(Column::new("Region".into(), ["Riyadh", "Jeddah", "Dammam"]));
    }
    DataFrame::new(columns).unwrap()
}

#[cfg(feature = "categorical-pool")]
#[test]
fn single_vehicle_quote_reports_an_eighteen_percent_band() {
    let (estimator, calls) = estimator(bare_ensemble(50_000.0, json!([])));

    let band = estimator.quote(&camry()).unwrap();
    assert_eq!(band.estimate, 50_000.0);
    assert_eq!(
        band.render("SAR"),
        "SAR 50,000\nEstimation (±18%)\nSAR 41,000 - 59,000"
    );

    // A second quote reuses the download, the decoded model and the chosen path.
    estimator.quote(&camry()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        estimator.engine().unwrap().kind(),
        Some(PredictorKind::ExplicitCategorical)
    );
}

#[cfg(feature = "categorical-pool")]
#[test]
fn batch_appends_rounded_predictions_in_row_order() {
    let (estimator, calls) = estimator(mileage_steps());
    let original = upload(true);

    let out = estimator.predict_batch(original.clone()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(out.width(), original.width() + 1);
    assert!(out.select(original.get_column_names_str()).unwrap().equals(&original));

    let predictions: Vec<Option<i64>> = out
        .column("Prediction")
        .unwrap()
        .as_materialized_series()
        .i64()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(predictions, vec![Some(10_000), Some(20_001), Some(30_000)]);
}

#[test]
fn batch_missing_a_column_fails_before_any_download() {
    let (estimator, calls) = estimator(mileage_steps());

    let err = estimator.predict_batch(upload(false)).unwrap_err();
    assert!(matches!(
        err,
        EstimateError::Reconcile(ReconcileError::MissingColumns(ref missing)) if missing == &["Region"]
    ));
    assert!(err.user_message().contains("Region"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn out_of_range_record_fails_before_any_download() {
    let (estimator, calls) = estimator(bare_ensemble(50_000.0, json!([])));
    let record = VehicleRecord {
        mileage: 400_000,
        ..camry()
    };
    assert!(matches!(
        estimator.quote(&record),
        Err(EstimateError::Record(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn html_landing_page_is_reported_with_a_hint() {
    let (estimator, _) = estimator(b"<!DOCTYPE html><html><title>repo</title></html>".to_vec());
    let err = estimator.quote(&camry()).unwrap_err();
    assert!(matches!(err, EstimateError::Load(LoadError::WrongArtifact { .. })));
    assert!(err.user_message().contains("raw file"));
}

#[test]
fn local_artifact_with_metadata_files_and_checksum() {
    let dir = tempdir().unwrap();
    let artifact = dir.path().join("model.json");
    let body = json!({
        "kind": "pipeline",
        "categorical_columns": ["Make"],
        "numeric_fill": {"Year": 2010.0},
        "regressor": {
            "feature_names": ["Make", "Year"],
            "cat_features": ["Make"],
            "base_score": 30000.0,
            "trees": [{"nodes": [
                {"type": "categorical", "feature": 0, "categories": ["Toyota"], "left": 1, "right": 2},
                {"type": "leaf", "value": 20000.0},
                {"type": "leaf", "value": 0.0}
            ]}]
        }
    })
    .to_string();
    fs::write(&artifact, &body).unwrap();

    let features = dir.path().join("feature_names.json");
    let categorical = dir.path().join("cat_cols.json");
    fs::write(&features, r#"["Make", "Year"]"#).unwrap();
    fs::write(&categorical, r#"["Make"]"#).unwrap();

    let config = AppConfig {
        model_url: artifact.to_str().unwrap().to_string(),
        expected_sha256: sha256_hex(body.as_bytes()).to_uppercase(),
        feature_names_path: features,
        categorical_columns_path: categorical,
        ..AppConfig::default()
    };
    let estimator = Estimator::from_config(config).unwrap();
    assert_eq!(estimator.spec().feature_order(), ["Make", "Year"]);

    let band = estimator.quote(&camry()).unwrap();
    assert_eq!(band.estimate, 50_000.0);
    assert_eq!(
        estimator.engine().unwrap().kind(),
        Some(PredictorKind::GenericTabular)
    );
}
