//! Selectable values for the quote form, taken from a reference listings file.
//!
//! Type choices depend on the Make and Region choices depend on the Origin;
//! the other labels are flat sorted lists.

use crate::quote::VehicleRecord;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("The reference file has no '{0}' column.")]
    MissingColumn(&'static str),
    #[error("'{value}' is not a known {field}.")]
    UnknownValue { field: &'static str, value: String },
    #[error("'{vehicle_type}' is not a {make} model.")]
    TypeNotForMake { make: String, vehicle_type: String },
    #[error("'{region}' is not a region for origin '{origin}'.")]
    RegionNotForOrigin { origin: String, region: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub types_by_make: BTreeMap<String, BTreeSet<String>>,
    pub regions_by_origin: BTreeMap<String, BTreeSet<String>>,
    pub gear_types: BTreeSet<String>,
    pub options: BTreeSet<String>,
    pub colors: BTreeSet<String>,
    pub fuel_types: BTreeSet<String>,
}

impl Catalog {
    pub fn from_csv(path: &Path) -> Result<Self, CatalogError> {
        Self::from_frame(&crate::pipeline::read_csv_table(path)?)
    }

    /// Collects every non-null label. A Make without a Type (or an Origin
    /// without a Region) is still listed, with no dependent choices.
    pub fn from_frame(frame: &DataFrame) -> Result<Self, CatalogError> {
        let make = labels(frame, "Make")?;
        let vehicle_type = labels(frame, "Type")?;
        let origin = labels(frame, "Origin")?;
        let region = labels(frame, "Region")?;

        let mut catalog = Catalog {
            types_by_make: pair_up(&make, &vehicle_type),
            regions_by_origin: pair_up(&origin, &region),
            ..Catalog::default()
        };
        for (field, target) in [
            ("Gear_Type", &mut catalog.gear_types),
            ("Options", &mut catalog.options),
            ("Color", &mut catalog.colors),
            ("Fuel_Type", &mut catalog.fuel_types),
        ] {
            target.extend(labels(frame, field)?.into_iter().flatten());
        }
        Ok(catalog)
    }

    pub fn types_for(&self, make: &str) -> Option<&BTreeSet<String>> {
        self.types_by_make.get(make)
    }

    pub fn regions_for(&self, origin: &str) -> Option<&BTreeSet<String>> {
        self.regions_by_origin.get(origin)
    }

    /// Checks that every label of `record` is one the form would offer.
    pub fn validate(&self, record: &VehicleRecord) -> Result<(), CatalogError> {
        let types = self
            .types_for(&record.make)
            .ok_or_else(|| unknown("Make", &record.make))?;
        if !types.contains(&record.vehicle_type) {
            return Err(CatalogError::TypeNotForMake {
                make: record.make.clone(),
                vehicle_type: record.vehicle_type.clone(),
            });
        }

        let regions = self
            .regions_for(&record.origin)
            .ok_or_else(|| unknown("Origin", &record.origin))?;
        if !regions.contains(&record.region) {
            return Err(CatalogError::RegionNotForOrigin {
                origin: record.origin.clone(),
                region: record.region.clone(),
            });
        }

        for (field, known, value) in [
            ("Gear_Type", &self.gear_types, &record.gear_type),
            ("Options", &self.options, &record.options),
            ("Color", &self.colors, &record.color),
            ("Fuel_Type", &self.fuel_types, &record.fuel_type),
        ] {
            if !known.contains(value) {
                return Err(unknown(field, value));
            }
        }
        Ok(())
    }
}

fn unknown(field: &'static str, value: &str) -> CatalogError {
    CatalogError::UnknownValue {
        field,
        value: value.to_string(),
    }
}

fn labels(frame: &DataFrame, name: &'static str) -> Result<Vec<Option<String>>, CatalogError> {
    let column = frame
        .column(name)
        .map_err(|_| CatalogError::MissingColumn(name))?
        .cast(&DataType::String)?;
    Ok(column
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|value| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        .collect())
}

fn pair_up(
    keys: &[Option<String>],
    values: &[Option<String>],
) -> BTreeMap<String, BTreeSet<String>> {
    let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (key, value) in keys.iter().zip(values) {
        let Some(key) = key else { continue };
        let entry = map.entry(key.clone()).or_default();
        if let Some(value) = value {
            entry.insert(value.clone());
        }
    }
    map
}
