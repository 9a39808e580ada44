//! The serialized predictor family.
//!
//! An artifact is a JSON document (optionally gzip-compressed) holding one of:
//! - `ensemble`: a bare boosted-tree regressor. Its tabular entry point only
//!   understands a dense numeric matrix, so any model with categorical splits
//!   has to be fed through a `FeaturePool`.
//! - `pipeline`: preprocessing (categorical column list, numeric imputation,
//!   target transform) wrapped around an ensemble. It reads the reconciled
//!   table directly.

use crate::pool::{FeaturePool, FeatureRows, FeatureValue};
use crate::predict::{PredictError, Predictor};
use crate::reconcile::ReconciledTable;
use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("artifact is not a valid model document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to decompress artifact: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("tree {tree}, node {node}: {reason}")]
    MalformedTree {
        tree: usize,
        node: usize,
        reason: String,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Ensemble(TreeEnsemble),
    Pipeline(PipelineModel),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub cat_features: Vec<String>,
    #[serde(default)]
    pub base_score: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    pub trees: Vec<Tree>,
}

fn default_learning_rate() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

/// Split children always have larger indices than their parent, so every walk
/// from the root terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// `value < threshold` goes left; missing values follow `missing_left`.
    Numeric {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default)]
        missing_left: bool,
    },
    /// Labels in `categories` go left; everything else, including missing, goes right.
    Categorical {
        feature: usize,
        categories: Vec<String>,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTransform {
    #[default]
    Identity,
    /// The regressor was trained on `ln(1 + price)`.
    Log1p,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineModel {
    pub categorical_columns: Vec<String>,
    #[serde(default)]
    pub numeric_fill: BTreeMap<String, f64>,
    #[serde(default)]
    pub target: TargetTransform,
    pub regressor: TreeEnsemble,
}

/// Decodes and validates an artifact.
pub fn decode_artifact(bytes: &[u8]) -> Result<ModelArtifact, ModelError> {
    let artifact: ModelArtifact = if bytes.starts_with(&GZIP_MAGIC) {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        serde_json::from_slice(&json)?
    } else {
        serde_json::from_slice(bytes)?
    };
    artifact.validate()?;
    Ok(artifact)
}

impl ModelArtifact {
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            ModelArtifact::Ensemble(ensemble) => ensemble.validate(),
            ModelArtifact::Pipeline(pipeline) => pipeline.validate(),
        }
    }

    pub fn feature_names(&self) -> &[String] {
        match self {
            ModelArtifact::Ensemble(ensemble) => &ensemble.feature_names,
            ModelArtifact::Pipeline(pipeline) => &pipeline.regressor.feature_names,
        }
    }
}

impl Predictor for ModelArtifact {
    fn predict_table(&self, table: &ReconciledTable) -> Result<Vec<f64>, PredictError> {
        match self {
            ModelArtifact::Ensemble(ensemble) => ensemble.predict_dense(table),
            ModelArtifact::Pipeline(pipeline) => {
                let rows = table.feature_rows(
                    &pipeline.regressor.feature_names,
                    &pipeline.categorical_columns,
                )?;
                pipeline.predict_rows(rows)
            }
        }
    }

    fn predict_pool(&self, pool: &FeaturePool) -> Result<Vec<f64>, PredictError> {
        match self {
            ModelArtifact::Ensemble(ensemble) => ensemble.predict_rows(pool.rows()),
            ModelArtifact::Pipeline(pipeline) => pipeline.predict_rows(pool.rows().clone()),
        }
    }

    fn describe(&self) -> String {
        match self {
            ModelArtifact::Ensemble(ensemble) => format!(
                "TreeEnsemble ({} trees, {} categorical features)",
                ensemble.trees.len(),
                ensemble.cat_features.len()
            ),
            ModelArtifact::Pipeline(pipeline) => format!(
                "Pipeline[{:?} target] -> TreeEnsemble ({} trees)",
                pipeline.target,
                pipeline.regressor.trees.len()
            ),
        }
    }
}

impl PipelineModel {
    fn validate(&self) -> Result<(), ModelError> {
        self.regressor.validate()?;
        if let Some(name) = self
            .regressor
            .cat_features
            .iter()
            .find(|c| !self.categorical_columns.contains(*c))
        {
            return Err(ModelError::Invalid(format!(
                "regressor treats '{name}' as categorical but the pipeline does not encode it"
            )));
        }
        Ok(())
    }

    fn predict_rows(&self, mut rows: FeatureRows) -> Result<Vec<f64>, PredictError> {
        for (name, fill) in &self.numeric_fill {
            if let Some(column) = rows.index_of(name) {
                rows.fill_missing_numbers(column, *fill);
            }
        }
        let raw = self.regressor.predict_rows(&rows)?;
        Ok(match self.target {
            TargetTransform::Identity => raw,
            TargetTransform::Log1p => raw.into_iter().map(f64::exp_m1).collect(),
        })
    }
}

/// What a tree sees for one feature of one row.
enum Lookup<'a> {
    Number(Option<f64>),
    Category(Option<&'a str>),
}

trait FeatureAccess {
    fn lookup(&self, feature: usize) -> Lookup<'_>;
}

impl FeatureAccess for ArrayView1<'_, f64> {
    fn lookup(&self, feature: usize) -> Lookup<'_> {
        let value = self[feature];
        Lookup::Number((!value.is_nan()).then_some(value))
    }
}

/// A feature row addressed by model feature index.
struct MixedRow<'a> {
    values: &'a [FeatureValue],
    columns: &'a [usize],
}

impl FeatureAccess for MixedRow<'_> {
    fn lookup(&self, feature: usize) -> Lookup<'_> {
        match &self.values[self.columns[feature]] {
            FeatureValue::Number(value) => Lookup::Number(*value),
            FeatureValue::Category(label) => Lookup::Category(label.as_deref()),
        }
    }
}

impl TreeEnsemble {
    pub fn validate(&self) -> Result<(), ModelError> {
        let n_features = self.feature_names.len();
        let cat_indices = self.categorical_indices()?;

        if !self.learning_rate.is_finite() || !self.base_score.is_finite() {
            return Err(ModelError::Invalid(
                "learning_rate and base_score must be finite".to_string(),
            ));
        }

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ModelError::MalformedTree {
                    tree: t,
                    node: 0,
                    reason: "tree has no nodes".to_string(),
                });
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                let malformed = |reason: String| ModelError::MalformedTree {
                    tree: t,
                    node: i,
                    reason,
                };
                let (feature, left, right, categorical) = match node {
                    Node::Leaf { value } if value.is_finite() => continue,
                    Node::Leaf { .. } => return Err(malformed("leaf value is not finite".into())),
                    Node::Numeric {
                        feature,
                        left,
                        right,
                        ..
                    } => (*feature, *left, *right, false),
                    Node::Categorical {
                        feature,
                        left,
                        right,
                        ..
                    } => (*feature, *left, *right, true),
                };
                if feature >= n_features {
                    return Err(malformed(format!(
                        "feature index {feature} out of range for {n_features} features"
                    )));
                }
                if categorical != cat_indices.contains(&feature) {
                    return Err(malformed(format!(
                        "split kind does not match the declared role of '{}'",
                        self.feature_names[feature]
                    )));
                }
                for child in [left, right] {
                    if child <= i || child >= tree.nodes.len() {
                        return Err(malformed(format!("child index {child} is invalid")));
                    }
                }
            }
        }
        Ok(())
    }

    fn categorical_indices(&self) -> Result<HashSet<usize>, ModelError> {
        self.cat_features
            .iter()
            .map(|name| {
                self.feature_names
                    .iter()
                    .position(|f| f == name)
                    .ok_or_else(|| {
                        ModelError::Invalid(format!(
                            "categorical feature '{name}' is not among the feature names"
                        ))
                    })
            })
            .collect()
    }

    /// Generic tabular path: a dense numeric matrix in model feature order.
    fn predict_dense(&self, table: &ReconciledTable) -> Result<Vec<f64>, PredictError> {
        if !self.cat_features.is_empty() {
            return Err(PredictError::Incompatible(format!(
                "a bare ensemble cannot infer categorical features ({}); declare them explicitly",
                self.cat_features.iter().join(", ")
            )));
        }
        let matrix = table.numeric_matrix(&self.feature_names)?;
        matrix
            .outer_iter()
            .into_par_iter()
            .map(|row| self.evaluate(&row))
            .collect()
    }

    /// Pool path: rows are matched to model features by name.
    fn predict_rows(&self, rows: &FeatureRows) -> Result<Vec<f64>, PredictError> {
        let cat_indices = self
            .categorical_indices()
            .map_err(|e| PredictError::Incompatible(e.to_string()))?;
        let columns: Vec<usize> = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(f, name)| {
                let column = rows
                    .index_of(name)
                    .ok_or_else(|| PredictError::MissingFeature(name.clone()))?;
                if rows.is_categorical(column) != cat_indices.contains(&f) {
                    return Err(PredictError::Incompatible(format!(
                        "feature '{name}' is declared with a different role than the model was trained with"
                    )));
                }
                Ok(column)
            })
            .collect::<Result<_, _>>()?;

        rows.rows()
            .par_iter()
            .map(|values| {
                self.evaluate(&MixedRow {
                    values,
                    columns: &columns,
                })
            })
            .collect()
    }

    fn evaluate<A: FeatureAccess>(&self, row: &A) -> Result<f64, PredictError> {
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.evaluate(row)?;
        }
        Ok(self.base_score + self.learning_rate * sum)
    }
}

impl Tree {
    fn evaluate<A: FeatureAccess>(&self, row: &A) -> Result<f64, PredictError> {
        let mut index = 0;
        loop {
            index = match &self.nodes[index] {
                Node::Leaf { value } => return Ok(*value),
                Node::Numeric {
                    feature,
                    threshold,
                    left,
                    right,
                    missing_left,
                } => match row.lookup(*feature) {
                    Lookup::Number(Some(v)) if v < *threshold => *left,
                    Lookup::Number(Some(_)) => *right,
                    Lookup::Number(None) if *missing_left => *left,
                    Lookup::Number(None) => *right,
                    Lookup::Category(_) => {
                        return Err(PredictError::Incompatible(format!(
                            "numeric split on feature {feature} received a label"
                        )));
                    }
                },
                Node::Categorical {
                    feature,
                    categories,
                    left,
                    right,
                } => match row.lookup(*feature) {
                    Lookup::Category(Some(label)) if categories.iter().any(|c| c == label) => {
                        *left
                    }
                    Lookup::Category(_) => *right,
                    Lookup::Number(_) => {
                        return Err(PredictError::Incompatible(format!(
                            "categorical split on feature {feature} received a number"
                        )));
                    }
                },
            };
        }
    }
}
