//! # Feature Schema
//!
//! A `FeatureSpec` is the contract between an input table and a predictor: the
//! exact column order the predictor was trained on, and which of those columns
//! hold category labels rather than quantities.
//!
//! A `FeatureSpec` is resolved once per process from two independent sources, the
//! side-channel metadata files shipped with the artifact or the built-in
//! defaults, and is immutable afterwards. Nothing downstream asks whether a
//! metadata file existed.

use log::{info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Column order of the used-car price models.
pub const DEFAULT_FEATURE_ORDER: [&str; 11] = [
    "Make",
    "Type",
    "Year",
    "Origin",
    "Color",
    "Options",
    "Engine_Size",
    "Fuel_Type",
    "Gear_Type",
    "Mileage",
    "Region",
];

/// Columns of `DEFAULT_FEATURE_ORDER` that carry category labels.
pub const DEFAULT_CATEGORICAL_COLUMNS: [&str; 8] = [
    "Make",
    "Type",
    "Origin",
    "Color",
    "Options",
    "Fuel_Type",
    "Gear_Type",
    "Region",
];

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read feature metadata '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Feature metadata '{path}' is not a JSON array of column names: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("The feature list is empty; a predictor needs at least one input column.")]
    EmptyFeatureOrder,
    #[error("The feature '{0}' appears more than once in the feature list.")]
    DuplicateFeature(String),
}

/// How a reconciled column is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureRole {
    /// Nullable text; never parsed as a number.
    Categorical,
    /// Float64; unparseable values become missing.
    Numeric,
}

/// Where each half of a `FeatureSpec` came from. Only used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecOrigin {
    MetadataFile,
    BuiltinDefault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    feature_order: Vec<String>,
    categorical_columns: Vec<String>,
    numeric_columns: Vec<String>,
}

impl FeatureSpec {
    /// Builds a spec from an ordered feature list and a categorical subset.
    ///
    /// Every feature not named as categorical is numeric, so the two role lists
    /// always partition `feature_order`. Categorical names that are not features
    /// are ignored with a warning; the metadata files are produced by a separate
    /// training job and are not guaranteed to be tidy.
    pub fn new<S: AsRef<str>>(
        feature_order: &[S],
        categorical: &[S],
    ) -> Result<Self, SchemaError> {
        if feature_order.is_empty() {
            return Err(SchemaError::EmptyFeatureOrder);
        }

        let mut seen = HashSet::with_capacity(feature_order.len());
        for name in feature_order {
            if !seen.insert(name.as_ref()) {
                return Err(SchemaError::DuplicateFeature(name.as_ref().to_string()));
            }
        }

        let declared: HashSet<&str> = categorical.iter().map(AsRef::as_ref).collect();
        for name in &declared {
            if !seen.contains(name) {
                warn!("Categorical column '{name}' is not a model feature; ignoring it.");
            }
        }

        let feature_order: Vec<String> = feature_order
            .iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let (categorical_columns, numeric_columns): (Vec<String>, Vec<String>) = feature_order
            .iter()
            .cloned()
            .partition(|name| declared.contains(name.as_str()));

        Ok(Self {
            feature_order,
            categorical_columns,
            numeric_columns,
        })
    }

    /// The hard-coded used-car schema.
    pub fn builtin() -> Self {
        Self {
            feature_order: DEFAULT_FEATURE_ORDER.iter().map(|s| s.to_string()).collect(),
            categorical_columns: DEFAULT_CATEGORICAL_COLUMNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            numeric_columns: ["Year", "Engine_Size", "Mileage"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Resolves the schema from the two metadata files, falling back to the
    /// built-in lists for whichever file is absent.
    pub fn resolve(
        feature_names_path: &Path,
        categorical_columns_path: &Path,
    ) -> Result<(Self, SpecOrigin), SchemaError> {
        let features = read_name_list(feature_names_path)?;
        let categorical = read_name_list(categorical_columns_path)?;

        let origin = if features.is_some() || categorical.is_some() {
            SpecOrigin::MetadataFile
        } else {
            SpecOrigin::BuiltinDefault
        };

        let features = features.unwrap_or_else(|| {
            DEFAULT_FEATURE_ORDER.iter().map(|s| s.to_string()).collect()
        });
        let categorical = categorical.unwrap_or_else(|| {
            DEFAULT_CATEGORICAL_COLUMNS
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

        let spec = Self::new(&features, &categorical)?;
        info!(
            "Feature schema ({origin:?}): {} features, {} categorical.",
            spec.feature_order.len(),
            spec.categorical_columns.len()
        );
        Ok((spec, origin))
    }

    pub fn feature_order(&self) -> &[String] {
        &self.feature_order
    }

    pub fn categorical_columns(&self) -> &[String] {
        &self.categorical_columns
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    pub fn role_of(&self, column: &str) -> Option<FeatureRole> {
        if self.categorical_columns.iter().any(|c| c == column) {
            Some(FeatureRole::Categorical)
        } else if self.numeric_columns.iter().any(|c| c == column) {
            Some(FeatureRole::Numeric)
        } else {
            None
        }
    }
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self::builtin()
    }
}

fn read_name_list(path: &Path) -> Result<Option<Vec<String>>, SchemaError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let names = serde_json::from_str(&text).map_err(|source| SchemaError::Json {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn builtin_roles_partition_feature_order() {
        let spec = FeatureSpec::builtin();
        assert_eq!(spec.feature_order().len(), 11);
        assert_eq!(
            spec.categorical_columns().len() + spec.numeric_columns().len(),
            spec.feature_order().len()
        );
        for name in spec.feature_order() {
            assert!(spec.role_of(name).is_some(), "{name} has no role");
        }
        assert_eq!(spec.role_of("Year"), Some(FeatureRole::Numeric));
        assert_eq!(spec.role_of("Make"), Some(FeatureRole::Categorical));
        assert_eq!(spec.role_of("Price"), None);
    }

    #[test]
    fn builtin_matches_generic_constructor() {
        let built = FeatureSpec::new(&DEFAULT_FEATURE_ORDER, &DEFAULT_CATEGORICAL_COLUMNS).unwrap();
        assert_eq!(built, FeatureSpec::builtin());
    }

    #[test]
    fn roles_follow_feature_order() {
        let spec = FeatureSpec::new(&["b", "a", "c"], &["c", "b"]).unwrap();
        assert_eq!(spec.categorical_columns(), ["b", "c"]);
        assert_eq!(spec.numeric_columns(), ["a"]);
    }

    #[test]
    fn unknown_categorical_names_are_dropped() {
        let spec = FeatureSpec::new(&["Year", "Make"], &["Make", "Trim"]).unwrap();
        assert_eq!(spec.categorical_columns(), ["Make"]);
        assert_eq!(spec.numeric_columns(), ["Year"]);
    }

    #[test]
    fn duplicate_and_empty_feature_lists_are_rejected() {
        let err = FeatureSpec::new(&["Year", "Year"], &[]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateFeature(ref name) if name == "Year"));

        let empty: [&str; 0] = [];
        let err = FeatureSpec::new(&empty, &empty).unwrap_err();
        assert!(matches!(err, SchemaError::EmptyFeatureOrder));
    }

    #[test]
    fn resolve_without_files_uses_builtin() {
        let dir = tempdir().unwrap();
        let (spec, origin) = FeatureSpec::resolve(
            &dir.path().join("feature_names.json"),
            &dir.path().join("cat_cols.json"),
        )
        .unwrap();
        assert_eq!(origin, SpecOrigin::BuiltinDefault);
        assert_eq!(spec, FeatureSpec::builtin());
    }

    #[test]
    fn resolve_reads_each_file_independently() {
        let dir = tempdir().unwrap();
        let features = dir.path().join("feature_names.json");
        fs::write(&features, r#"["Mileage", "Make", "Year"]"#).unwrap();

        let (spec, origin) =
            FeatureSpec::resolve(&features, &dir.path().join("cat_cols.json")).unwrap();
        assert_eq!(origin, SpecOrigin::MetadataFile);
        assert_eq!(spec.feature_order(), ["Mileage", "Make", "Year"]);
        // Categorical names come from the default list, filtered to the features.
        assert_eq!(spec.categorical_columns(), ["Make"]);
        assert_eq!(spec.numeric_columns(), ["Mileage", "Year"]);
    }

    #[test]
    fn malformed_metadata_is_reported() {
        let dir = tempdir().unwrap();
        let cats = dir.path().join("cat_cols.json");
        fs::write(&cats, "{\"Make\": true}").unwrap();
        let err = FeatureSpec::resolve(&dir.path().join("missing.json"), &cats).unwrap_err();
        assert!(matches!(err, SchemaError::Json { .. }));
    }
}
