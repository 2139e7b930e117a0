//! Query-wide expansion configuration
//!
//! Loaded from a JSON file (or built in code) by the predicate layer and
//! shared, read-only, by every expansion task of a query.
//!
//! Thresholds and the scan budget use signed values: anything <= 0 means
//! unbounded.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lookup::{LookupError, LookupResult};

/// Expansion settings for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Forward global index table
    #[serde(default = "default_index_table")]
    pub index_table_name: String,

    /// Reverse global index table
    #[serde(default = "default_reverse_index_table")]
    pub reverse_index_table_name: String,

    /// First shard date to consider
    #[serde(default = "default_begin_date")]
    pub begin_date: NaiveDate,

    /// Last shard date to consider (inclusive)
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,

    /// Datatypes to restrict to (empty = all)
    #[serde(default)]
    pub datatype_filter: BTreeSet<String>,

    /// Wall-clock budget per lookup in milliseconds (<= 0 waits forever)
    #[serde(default = "default_max_index_scan_time_ms")]
    pub max_index_scan_time_ms: i64,

    /// Max distinct fields per lookup before the result is discarded
    #[serde(default = "default_max_unfielded_expansion_threshold")]
    pub max_unfielded_expansion_threshold: i64,

    /// Max distinct values per field before the field is marked exceeded
    #[serde(default = "default_max_value_expansion_threshold")]
    pub max_value_expansion_threshold: i64,

    /// Realm suffixes stripped from trailing literals before comparing
    /// forward and reverse literal lengths
    #[serde(default)]
    pub realm_suffix_exclusion_patterns: Vec<String>,

    /// Allow scans with no anchored literal on either side
    #[serde(default)]
    pub full_table_scan_enabled: bool,

    /// Patterns never worth expanding
    #[serde(default = "default_disallowed_regex_patterns")]
    pub disallowed_regex_patterns: BTreeSet<String>,

    /// Base priority for server-side filters
    #[serde(default = "default_base_iterator_priority")]
    pub base_iterator_priority: u32,

    /// Lookups allowed to scan concurrently
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

fn default_index_table() -> String {
    "shardIndex".to_string()
}
fn default_reverse_index_table() -> String {
    "shardReverseIndex".to_string()
}
fn default_begin_date() -> NaiveDate {
    NaiveDate::default()
}
fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}
fn default_max_index_scan_time_ms() -> i64 {
    31_536_000_000
} // one year, effectively unbounded
fn default_max_unfielded_expansion_threshold() -> i64 {
    500
}
fn default_max_value_expansion_threshold() -> i64 {
    5_000
}
fn default_disallowed_regex_patterns() -> BTreeSet<String> {
    [".*", ".*?"].iter().map(|s| s.to_string()).collect()
}
fn default_base_iterator_priority() -> u32 {
    100
}
fn default_max_concurrent_lookups() -> usize {
    8
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            index_table_name: default_index_table(),
            reverse_index_table_name: default_reverse_index_table(),
            begin_date: default_begin_date(),
            end_date: default_end_date(),
            datatype_filter: BTreeSet::new(),
            max_index_scan_time_ms: default_max_index_scan_time_ms(),
            max_unfielded_expansion_threshold: default_max_unfielded_expansion_threshold(),
            max_value_expansion_threshold: default_max_value_expansion_threshold(),
            realm_suffix_exclusion_patterns: Vec::new(),
            full_table_scan_enabled: false,
            disallowed_regex_patterns: default_disallowed_regex_patterns(),
            base_iterator_priority: default_base_iterator_priority(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

impl ExpansionConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> LookupResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LookupError::Config(format!("Failed to read config: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(content: &str) -> LookupResult<Self> {
        let config: ExpansionConfig = serde_json::from_str(content)
            .map_err(|e| LookupError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> LookupResult<()> {
        if self.index_table_name.is_empty() || self.reverse_index_table_name.is_empty() {
            return Err(LookupError::Config("index table names must not be empty".into()));
        }

        if self.end_date < self.begin_date {
            return Err(LookupError::Config(format!(
                "end_date {} precedes begin_date {}",
                self.end_date, self.begin_date
            )));
        }

        if self.max_concurrent_lookups == 0 {
            return Err(LookupError::Config("max_concurrent_lookups must be > 0".into()));
        }

        for exclusion in &self.realm_suffix_exclusion_patterns {
            Regex::new(exclusion).map_err(|e| {
                LookupError::Config(format!("Invalid realm exclusion '{}': {}", exclusion, e))
            })?;
        }

        Ok(())
    }

    /// Scan budget, `None` when unbounded
    pub fn max_index_scan_time(&self) -> Option<Duration> {
        if self.max_index_scan_time_ms > 0 {
            Some(Duration::from_millis(self.max_index_scan_time_ms as u64))
        } else {
            None
        }
    }

    /// Builder-style budget override
    pub fn with_max_index_scan_time_ms(mut self, millis: i64) -> Self {
        self.max_index_scan_time_ms = millis;
        self
    }

    /// Builder-style threshold override
    pub fn with_thresholds(mut self, key_threshold: i64, value_threshold: i64) -> Self {
        self.max_unfielded_expansion_threshold = key_threshold;
        self.max_value_expansion_threshold = value_threshold;
        self
    }

    /// `yyyyMMdd` form of the begin date, as stored in shard ids
    pub fn begin_shard_date(&self) -> String {
        self.begin_date.format("%Y%m%d").to_string()
    }

    /// `yyyyMMdd` form of the end date
    pub fn end_shard_date(&self) -> String {
        self.end_date.format("%Y%m%d").to_string()
    }
}
