//! Run and per-code metadata records written alongside the selections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CollectConfig, QueryBy, SelectionMode};
use crate::sampler::{CodeSelection, CodeStats};
use crate::types::{CodeName, LogMessage};

/// Metadata for one code, written next to its selection file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeRunMetadata {
    /// When the code's outputs were written.
    pub timestamp: DateTime<Utc>,
    /// API the entries came from.
    pub base_url: String,
    /// Code as requested.
    pub code: CodeName,
    /// Quantity the code was queried by.
    pub query_by: QueryBy,
    /// Selection mode in effect.
    pub mode: SelectionMode,
    /// Whether buckets were keyed by dataset.
    pub dataset_aware: bool,
    /// Seed mixed into the pick key.
    pub seed: u64,
    /// Entries requested per page.
    pub page_size: usize,
    /// Under-fill threshold.
    pub min_entries_per_code: usize,
    /// Fewer picks than `min_entries_per_code`.
    pub under_filled: bool,
    /// Scan and pick statistics.
    pub stats: CodeStats,
}

impl CodeRunMetadata {
    /// Metadata record for `selection` collected under `config`.
    pub fn new(config: &CollectConfig, selection: &CodeSelection, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            base_url: config.base_url.clone(),
            code: selection.code.clone(),
            query_by: config.query_by,
            mode: config.mode,
            dataset_aware: config.dataset_aware,
            seed: config.seed,
            page_size: config.page_size,
            min_entries_per_code: selection.min_entries,
            under_filled: selection.under_filled,
            stats: selection.stats.clone(),
        }
    }
}

/// A code whose processing aborted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFailure {
    /// Code as requested.
    pub code: CodeName,
    /// Rendered error.
    pub error: String,
}

/// Metadata for a whole run, written once at the end.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// When the run metadata was written.
    pub finished_at: DateTime<Utc>,
    /// Effective configuration.
    pub config: CollectConfig,
    /// Codes requested, in order.
    pub codes: Vec<CodeName>,
    /// Codes whose outputs were written.
    pub codes_processed: usize,
    /// Entries selected across processed codes.
    pub total_picked_entries: u64,
    /// Remote calls made, retries included.
    pub api_calls: u64,
    /// Non-fatal conditions such as under-filled codes.
    pub warnings: Vec<LogMessage>,
    /// Codes that failed.
    pub failures: Vec<CodeFailure>,
}

impl RunMetadata {
    /// Empty record for a run that started at `timestamp`.
    pub fn start(config: &CollectConfig, codes: &[CodeName], timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            finished_at: timestamp,
            config: config.clone(),
            codes: codes.to_vec(),
            codes_processed: 0,
            total_picked_entries: 0,
            api_calls: 0,
            warnings: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Account for a successfully collected code.
    pub fn record_selection(&mut self, selection: &CodeSelection) {
        self.codes_processed += 1;
        self.total_picked_entries += selection.stats.entries_picked;
        if selection.under_filled {
            self.warnings.push(format!(
                "code '{}' under-filled: {} of {} required entries",
                selection.code, selection.stats.entries_picked, selection.min_entries
            ));
        }
    }

    /// Record a code that failed with `error`.
    pub fn record_failure(&mut self, code: &str, error: impl ToString) {
        self.failures.push(CodeFailure {
            code: code.to_string(),
            error: error.to_string(),
        });
    }

    /// True when no code failed.
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}
