//! Read-only data registry.
//!
//! Catalog of datasets the verification engine resolves data requirements
//! against. The pipeline never acquires data; it only checks that every
//! requirement is satisfiable over the requested history window.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::record::types::DataRequirement;

/// Acquisition tier of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTier {
    /// Ships with the backtest backend
    Native,
    /// Purchasable through the backend's marketplace
    Marketplace,
    /// Acquired and mounted by the research team
    Custom,
}

/// One cataloged dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: String,
    pub tier: DataTier,
    /// First date with data
    pub start: NaiveDate,
    /// Last date with data; `None` means still updating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    pub fields: Vec<String>,
}

impl DatasetEntry {
    /// Whether the dataset covers every date in `[start, end]`.
    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        if start < self.start {
            return false;
        }
        match self.end {
            Some(last) => end <= last,
            None => true,
        }
    }
}

/// The registry: datasets keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataRegistry {
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetEntry>,
}

impl DataRegistry {
    /// Load a registry from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn insert(&mut self, entry: DatasetEntry) {
        self.datasets.insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&DatasetEntry> {
        self.datasets.get(id)
    }

    /// Resolve one requirement over a history window.
    pub fn resolve(
        &self,
        requirement: &DataRequirement,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<&DatasetEntry> {
        let entry = self.datasets.get(&requirement.dataset).ok_or_else(|| {
            Error::data_unavailable(&requirement.dataset, "not in the data registry")
        })?;

        for field in &requirement.fields {
            if !entry.fields.contains(field) {
                return Err(Error::data_unavailable(
                    &requirement.dataset,
                    format!("field '{field}' not available"),
                ));
            }
        }
        if !entry.covers(start, end) {
            return Err(Error::data_unavailable(
                &requirement.dataset,
                format!(
                    "coverage {}..{} does not span {start}..{end}",
                    entry.start,
                    entry
                        .end
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "present".to_string()),
                ),
            ));
        }
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub(crate) fn sample_registry() -> DataRegistry {
        let mut registry = DataRegistry::default();
        registry.insert(DatasetEntry {
            id: "us-equity-daily".to_string(),
            tier: DataTier::Native,
            start: date(1970, 1, 1),
            end: None,
            fields: vec![
                "open".to_string(),
                "high".to_string(),
                "low".to_string(),
                "close".to_string(),
                "volume".to_string(),
            ],
        });
        registry.insert(DatasetEntry {
            id: "short-interest".to_string(),
            tier: DataTier::Marketplace,
            start: date(2013, 1, 1),
            end: Some(date(2024, 6, 30)),
            fields: vec!["short_interest".to_string(), "days_to_cover".to_string()],
        });
        registry
    }

    fn requirement(dataset: &str, fields: &[&str]) -> DataRequirement {
        DataRequirement {
            dataset: dataset.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_resolve_native_dataset() {
        let registry = sample_registry();
        let entry = registry
            .resolve(
                &requirement("us-equity-daily", &["close", "volume"]),
                date(2000, 1, 1),
                date(2020, 1, 1),
            )
            .unwrap();
        assert_eq!(entry.tier, DataTier::Native);
    }

    #[test]
    fn test_unknown_dataset_fails() {
        let registry = sample_registry();
        let err = registry
            .resolve(
                &requirement("satellite-parking-lots", &["car_count"]),
                date(2018, 1, 1),
                date(2020, 1, 1),
            )
            .unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { .. }));
    }

    #[test]
    fn test_missing_field_fails() {
        let registry = sample_registry();
        assert!(registry
            .resolve(
                &requirement("us-equity-daily", &["implied_vol"]),
                date(2000, 1, 1),
                date(2020, 1, 1),
            )
            .is_err());
    }

    #[test]
    fn test_coverage_window_enforced() {
        let registry = sample_registry();
        // Starts before the dataset exists
        assert!(registry
            .resolve(
                &requirement("short-interest", &["short_interest"]),
                date(2005, 1, 1),
                date(2020, 1, 1),
            )
            .is_err());
        // Ends after the dataset stops
        assert!(registry
            .resolve(
                &requirement("short-interest", &["short_interest"]),
                date(2015, 1, 1),
                date(2025, 1, 1),
            )
            .is_err());
        // Fully inside
        assert!(registry
            .resolve(
                &requirement("short-interest", &["short_interest"]),
                date(2015, 1, 1),
                date(2023, 1, 1),
            )
            .is_ok());
    }
}
