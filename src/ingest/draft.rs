//! Extracted strategy drafts.
//!
//! A draft is the structured form of a research artifact after extraction:
//! the proposed definition plus everything the quality filter scores —
//! source metadata, performance claims, and the raw text for red-flag
//! scanning. Drafts are not records; only an `accept` decision creates one.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::hash::source_content_hash;
use crate::record::types::{EdgeBlock, StrategyDefinition};

/// Metadata about where a draft came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Path, URL, or citation of the source document
    pub source_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// 0-15 credibility contribution to the trust score
    #[serde(default)]
    pub author_credibility: u8,
    /// Author sells courses, signals, or newsletters
    #[serde(default)]
    pub sells_products: bool,
}

/// Performance claims made by the source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClaimedPerformance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharpe: Option<f64>,
    /// High-frequency strategies are exempt from the Sharpe red flag
    #[serde(default)]
    pub is_high_frequency: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest_start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest_end: Option<NaiveDate>,
    /// Source shows out-of-sample or replicated evidence
    #[serde(default)]
    pub out_of_sample: bool,
    #[serde(default)]
    pub transaction_costs_discussed: bool,
    #[serde(default)]
    pub drawdown_discussed: bool,
    /// Independent observations backing the claim (trades, events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
}

/// An extracted strategy draft awaiting the quality filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDraft {
    pub name: String,
    pub source: SourceMeta,
    /// Full text of the source document, for red-flag scanning
    #[serde(default)]
    pub raw_text: String,
    pub definition: StrategyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stated_edge: Option<EdgeBlock>,
    #[serde(default)]
    pub claimed: ClaimedPerformance,
    /// Source includes code or pseudocode
    #[serde(default)]
    pub has_code: bool,
    /// Representative excerpt carried onto the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl StrategyDraft {
    /// Load a draft from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Ingestion idempotence key: hash of the normalized source content,
    /// falling back to the draft's own canonical form when the raw text
    /// was not captured.
    pub fn source_hash(&self) -> Result<String> {
        if self.raw_text.trim().is_empty() {
            crate::hash::hash_serializable(self)
        } else {
            Ok(source_content_hash(&self.raw_text))
        }
    }

    /// Length of the claimed backtest period in whole years, if stated.
    pub fn backtest_years(&self) -> Option<i32> {
        let start = self.claimed.backtest_start?;
        let end = self.claimed.backtest_end?;
        Some((end.signed_duration_since(start).num_days() / 365) as i32)
    }
}
