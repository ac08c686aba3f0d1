use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::client::{
    BACKOFF_FACTOR, DEFAULT_BASE_URL, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS,
};
use crate::constants::quantities::{
    DATASETS, ENTRY_ID, MAIN_AUTHOR, METHOD_NAME, PARSER_NAME, PROGRAM_NAME,
};
use crate::constants::sampler::{
    DEFAULT_MAX_AUTHORS_PER_CODE, DEFAULT_MAX_DATASETS_PER_AUTHOR, DEFAULT_PAGE_SIZE,
    DEFAULT_SEED,
};
use crate::errors::CollectError;

/// Remote field used to partition entries into codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryBy {
    /// Group by simulation program name.
    ProgramName,
    /// Group by parser identifier (entry point).
    ParserName,
}

impl QueryBy {
    /// Remote quantity queried for this grouping.
    pub fn quantity(self) -> &'static str {
        match self {
            Self::ProgramName => PROGRAM_NAME,
            Self::ParserName => PARSER_NAME,
        }
    }

    /// Short label used on the command line and in metadata.
    pub fn label(self) -> &'static str {
        match self {
            Self::ProgramName => "program_name",
            Self::ParserName => "parser_name",
        }
    }
}

/// How many records a bucket may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// One record per bucket, chosen by the stable pick hash.
    Representative,
    /// Every distinct entry, deduplicated by id only.
    CollectAll,
}

/// Bounded exponential backoff for transient query failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per page request, first try included.
    pub max_attempts: u32,
    /// Pause after the first failed attempt.
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Pause after the `failed_attempt`-th failure (1-based).
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let factor = BACKOFF_FACTOR.saturating_pow(exponent);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Top-level collection configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Base URL of the remote API (without the endpoint path).
    pub base_url: String,
    /// Seed mixed into the stable pick hash.
    pub seed: u64,
    /// Records requested per page; must be positive.
    pub page_size: usize,
    /// Distinct authors admitted per code before new authors are rejected.
    pub max_authors_per_code: usize,
    /// Distinct datasets admitted per author (dataset-aware mode only).
    pub max_datasets_per_author: usize,
    /// Codes ending below this many picks are flagged as under-filled.
    pub min_entries_per_code: usize,
    /// Pause before every remote call after the first.
    #[serde(with = "duration_millis")]
    pub polite_delay: Duration,
    /// Bucket capacity mode.
    pub mode: SelectionMode,
    /// Key buckets by (code, author, dataset) instead of (code, author).
    pub dataset_aware: bool,
    /// Remote field that partitions entries into codes.
    pub query_by: QueryBy,
    /// Remote quantity holding the main author.
    pub author_quantity: String,
    /// Field projection; empty means `default_projection`.
    pub include_fields: Vec<String>,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Stop paging a code once `is_saturated` holds.
    pub stop_when_saturated: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            seed: DEFAULT_SEED,
            page_size: DEFAULT_PAGE_SIZE,
            max_authors_per_code: DEFAULT_MAX_AUTHORS_PER_CODE,
            max_datasets_per_author: DEFAULT_MAX_DATASETS_PER_AUTHOR,
            min_entries_per_code: 0,
            polite_delay: Duration::ZERO,
            mode: SelectionMode::Representative,
            dataset_aware: false,
            query_by: QueryBy::ProgramName,
            author_quantity: MAIN_AUTHOR.to_string(),
            include_fields: Vec::new(),
            retry: RetryPolicy::default(),
            stop_when_saturated: true,
        }
    }
}

impl CollectConfig {
    /// Reject settings the collector cannot honor.
    pub fn validate(&self) -> Result<(), CollectError> {
        if self.page_size == 0 {
            return Err(CollectError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CollectError::Configuration(
                "max attempts must be greater than zero".to_string(),
            ));
        }
        if self.max_authors_per_code == 0 {
            return Err(CollectError::Configuration(
                "max authors per code must be greater than zero".to_string(),
            ));
        }
        if self.dataset_aware && self.max_datasets_per_author == 0 {
            return Err(CollectError::Configuration(
                "max datasets per author must be greater than zero in dataset-aware mode"
                    .to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(CollectError::Configuration(
                "base URL must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Fields requested from the remote for every entry.
    pub fn projection(&self) -> Vec<String> {
        if !self.include_fields.is_empty() {
            return self.include_fields.clone();
        }
        vec![
            ENTRY_ID.to_string(),
            self.author_quantity.clone(),
            DATASETS.to_string(),
            METHOD_NAME.to_string(),
        ]
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
