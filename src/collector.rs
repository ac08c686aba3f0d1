//! Collection orchestrator: one query-and-sample pass per code.

use tracing::{debug, info, warn};

use crate::config::CollectConfig;
use crate::data::PickedEntry;
use crate::errors::CollectError;
use crate::output::OutputLayout;
use crate::sampler::{CodeSelection, SamplingRules, SelectionState, is_saturated};
use crate::source::{CallCounter, EntrySource, QueryRequest};
use crate::types::CodeName;

/// Result of collecting one code.
#[derive(Debug)]
pub struct CodeOutcome {
    /// Code as requested.
    pub code: CodeName,
    /// Finalized selection, or the error that aborted this code.
    pub result: Result<CodeSelection, CollectError>,
}

/// Results of one `collect` call, in request order.
#[derive(Debug, Default)]
pub struct CollectionReport {
    /// One outcome per requested code.
    pub outcomes: Vec<CodeOutcome>,
    /// Remote calls made while collecting these codes.
    pub api_calls: u64,
}

impl CollectionReport {
    /// Successful selections.
    pub fn selections(&self) -> impl Iterator<Item = &CodeSelection> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
    }

    /// Failed codes with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &CollectError)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.result {
            Ok(_) => None,
            Err(err) => Some((outcome.code.as_str(), err)),
        })
    }

    /// True when any code failed.
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Drives the entry source and the bucket sampler for a set of codes.
///
/// Owns the run's `CallCounter`. When an output layout is attached, each
/// code's previous selection is loaded and pinned before paging starts.
pub struct Collector<S: EntrySource> {
    source: S,
    config: CollectConfig,
    layout: Option<OutputLayout>,
    calls: CallCounter,
}

impl<S: EntrySource> Collector<S> {
    /// Create a collector; fails on invalid configuration.
    pub fn new(source: S, config: CollectConfig) -> Result<Self, CollectError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            layout: None,
            calls: CallCounter::new(),
        })
    }

    /// Merge with selections previously written under `layout`.
    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Effective configuration.
    pub fn config(&self) -> &CollectConfig {
        &self.config
    }

    /// Total remote calls made by this collector so far.
    pub fn api_calls(&self) -> u64 {
        self.calls.total()
    }

    /// Collect every code in order. A failing code does not stop the others.
    pub fn collect(&self, codes: &[CodeName]) -> CollectionReport {
        let calls_before = self.calls.total();
        let mut outcomes = Vec::with_capacity(codes.len());
        for code in codes {
            info!("[nomad:collect] processing code '{}'", code);
            let result = self.collect_code(code);
            match &result {
                Ok(selection) => info!(
                    "[nomad:collect] code '{}' picked={} scanned={} authors={} calls={}",
                    code,
                    selection.stats.entries_picked,
                    selection.stats.entries_scanned,
                    selection.stats.authors_picked,
                    selection.stats.api_calls
                ),
                Err(err) => warn!("[nomad:collect] code '{}' failed: {}", code, err),
            }
            outcomes.push(CodeOutcome {
                code: code.clone(),
                result,
            });
        }
        CollectionReport {
            outcomes,
            api_calls: self.calls.total() - calls_before,
        }
    }

    /// Collect a single code.
    pub fn collect_code(&self, code: &str) -> Result<CodeSelection, CollectError> {
        let calls_before = self.calls.total();
        let mut state = SelectionState::new(code, SamplingRules::from_config(&self.config));
        if let Some(layout) = &self.layout {
            let existing = layout.load_selection(code)?;
            if !existing.is_empty() {
                let seeded = state.seed(existing.into_iter().map(PickedEntry::into_record));
                info!(
                    "[nomad:collect] seeded {} previously picked entries for '{}'",
                    seeded, code
                );
            }
        }

        let mut request = QueryRequest::new(
            self.config.query_by,
            code,
            self.config.page_size,
            self.config.projection(),
        )?;
        let mut pages = 0usize;
        loop {
            let page = self.source.fetch_page(&request, &self.calls)?;
            pages += 1;
            state.note_skipped(page.skipped);
            state.admit_all(page.records);
            debug!(
                "[nomad:collect] code '{}' page={} picked={} authors={}",
                code,
                pages,
                state.len(),
                state.author_count()
            );
            let Some(next) = page.next_cursor else {
                break;
            };
            if is_saturated(&state, &self.config) {
                info!(
                    "[nomad:collect] code '{}' saturated after {} pages; stopping early",
                    code, pages
                );
                break;
            }
            request = request.with_cursor(Some(next));
        }

        let mut selection = state.finalize(self.config.min_entries_per_code);
        selection.stats.api_calls = self.calls.total() - calls_before;
        if selection.under_filled {
            warn!(
                "[nomad:collect] code '{}' under-filled: {} of {} required entries",
                code, selection.stats.entries_picked, selection.min_entries
            );
        }
        Ok(selection)
    }
}
