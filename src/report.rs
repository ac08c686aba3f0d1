//! Aggregate CSV summaries across every collected code.
//!
//! Summaries are a pure function of the per-code metadata on disk, so a run
//! that touches only some codes still reports the others as last written.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::constants::output::{
    CODE_AUTHOR_CSV, CODE_AUTHOR_DATASET_CSV, CODE_OVERVIEW_CSV, GLOBAL_AUTHOR_DATASET_CSV,
};
use crate::errors::CollectError;
use crate::metadata::CodeRunMetadata;
use crate::output::OutputLayout;
use crate::types::{AuthorId, CodeName, DatasetId};

/// One row of `code_overview.csv`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeOverviewRow {
    /// Code the row describes.
    pub code: CodeName,
    /// Entries scanned.
    pub n_entries: u64,
    /// Entries selected.
    pub n_picked: u64,
    /// Distinct authors scanned.
    pub n_main_authors: u64,
    /// Distinct datasets scanned.
    pub n_datasets: u64,
    /// Fewer picks than the configured minimum.
    pub under_filled: bool,
}

/// One row of `code_author_overview.csv`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeAuthorRow {
    /// Code the author was scanned under.
    pub code: CodeName,
    /// Normalized main author.
    pub main_author: AuthorId,
    /// Entries scanned for this author.
    pub n_entries: u64,
    /// Entries selected for this author.
    pub n_picked: u64,
    /// Distinct datasets scanned for this author.
    pub n_datasets: u64,
}

/// One row of `code_author_dataset_overview.csv`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeAuthorDatasetRow {
    /// Code the entries were scanned under.
    pub code: CodeName,
    /// Normalized main author.
    pub main_author: AuthorId,
    /// Dataset id; empty in the CSV for entries without datasets.
    pub dataset_id: Option<DatasetId>,
    /// Entries scanned for this author and dataset.
    pub n_entries: u64,
}

/// One row of `global_author_dataset_overview.csv`, summed over codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalAuthorDatasetRow {
    /// Normalized main author.
    pub main_author: AuthorId,
    /// Dataset id; empty in the CSV for entries without datasets.
    pub dataset_id: Option<DatasetId>,
    /// Entries scanned for this author and dataset across all codes.
    pub n_entries: u64,
}

/// The four summary tables, each sorted by its key columns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summaries {
    /// Per-code totals.
    pub code_overview: Vec<CodeOverviewRow>,
    /// Per-code, per-author counts.
    pub code_author: Vec<CodeAuthorRow>,
    /// Per-code, per-author, per-dataset counts.
    pub code_author_dataset: Vec<CodeAuthorDatasetRow>,
    /// Per-author, per-dataset counts over every code.
    pub global_author_dataset: Vec<GlobalAuthorDatasetRow>,
}

/// Build the summary tables from per-code metadata.
///
/// Counts are over scanned entries; `n_picked` columns count the selection.
/// When the same code appears twice the later record wins.
pub fn build_summaries(records: &[CodeRunMetadata]) -> Summaries {
    let mut latest: BTreeMap<&str, &CodeRunMetadata> = BTreeMap::new();
    for record in records {
        latest.insert(record.code.as_str(), record);
    }

    let mut summaries = Summaries::default();
    let mut global: BTreeMap<(&AuthorId, &Option<DatasetId>), u64> = BTreeMap::new();
    for (code, record) in latest {
        let stats = &record.stats;
        summaries.code_overview.push(CodeOverviewRow {
            code: code.to_string(),
            n_entries: stats.entries_scanned,
            n_picked: stats.entries_picked,
            n_main_authors: stats.authors_scanned,
            n_datasets: stats.datasets_scanned,
            under_filled: record.under_filled,
        });
        for author in &stats.authors {
            summaries.code_author.push(CodeAuthorRow {
                code: code.to_string(),
                main_author: author.main_author.clone(),
                n_entries: author.n_entries,
                n_picked: author.n_picked,
                n_datasets: author
                    .datasets
                    .iter()
                    .filter(|dataset| dataset.dataset_id.is_some())
                    .count() as u64,
            });
            for dataset in &author.datasets {
                summaries.code_author_dataset.push(CodeAuthorDatasetRow {
                    code: code.to_string(),
                    main_author: author.main_author.clone(),
                    dataset_id: dataset.dataset_id.clone(),
                    n_entries: dataset.n_entries,
                });
                *global
                    .entry((&author.main_author, &dataset.dataset_id))
                    .or_default() += dataset.n_entries;
            }
        }
    }
    summaries.global_author_dataset = global
        .into_iter()
        .map(|((author, dataset_id), n_entries)| GlobalAuthorDatasetRow {
            main_author: author.clone(),
            dataset_id: dataset_id.clone(),
            n_entries,
        })
        .collect();
    summaries
}

impl Summaries {
    /// `code_overview.csv` contents.
    pub fn code_overview_csv(&self) -> String {
        let mut table = CsvTable::new(&[
            "code",
            "n_entries",
            "n_picked",
            "n_main_authors",
            "n_datasets",
            "under_filled",
        ]);
        for row in &self.code_overview {
            table.row(&[
                row.code.clone(),
                row.n_entries.to_string(),
                row.n_picked.to_string(),
                row.n_main_authors.to_string(),
                row.n_datasets.to_string(),
                row.under_filled.to_string(),
            ]);
        }
        table.finish()
    }

    /// `code_author_overview.csv` contents.
    pub fn code_author_csv(&self) -> String {
        let mut table =
            CsvTable::new(&["code", "main_author", "n_entries", "n_picked", "n_datasets"]);
        for row in &self.code_author {
            table.row(&[
                row.code.clone(),
                row.main_author.clone(),
                row.n_entries.to_string(),
                row.n_picked.to_string(),
                row.n_datasets.to_string(),
            ]);
        }
        table.finish()
    }

    /// `code_author_dataset_overview.csv` contents.
    pub fn code_author_dataset_csv(&self) -> String {
        let mut table = CsvTable::new(&["code", "main_author", "dataset_id", "n_entries"]);
        for row in &self.code_author_dataset {
            table.row(&[
                row.code.clone(),
                row.main_author.clone(),
                row.dataset_id.clone().unwrap_or_default(),
                row.n_entries.to_string(),
            ]);
        }
        table.finish()
    }

    /// `global_author_dataset_overview.csv` contents.
    pub fn global_author_dataset_csv(&self) -> String {
        let mut table = CsvTable::new(&["main_author", "dataset_id", "n_entries"]);
        for row in &self.global_author_dataset {
            table.row(&[
                row.main_author.clone(),
                row.dataset_id.clone().unwrap_or_default(),
                row.n_entries.to_string(),
            ]);
        }
        table.finish()
    }
}

/// Rebuild all summaries from the metadata under `layout` and write them.
pub fn write_summaries(layout: &OutputLayout) -> Result<Summaries, CollectError> {
    let records = layout.load_code_metadata()?;
    let summaries = build_summaries(&records);
    let tables = [
        (CODE_OVERVIEW_CSV, summaries.code_overview_csv()),
        (CODE_AUTHOR_CSV, summaries.code_author_csv()),
        (CODE_AUTHOR_DATASET_CSV, summaries.code_author_dataset_csv()),
        (GLOBAL_AUTHOR_DATASET_CSV, summaries.global_author_dataset_csv()),
    ];
    for (filename, contents) in tables {
        std::fs::write(layout.summary_path(filename), contents)?;
    }
    Ok(summaries)
}

struct CsvTable {
    out: String,
}

impl CsvTable {
    fn new(header: &[&str]) -> Self {
        let mut table = Self { out: String::new() };
        table.push_line(header.iter().copied());
        table
    }

    fn row(&mut self, cells: &[String]) {
        self.push_line(cells.iter().map(String::as_str));
    }

    fn push_line<'a>(&mut self, cells: impl Iterator<Item = &'a str>) {
        for (idx, cell) in cells.enumerate() {
            if idx > 0 {
                self.out.push(',');
            }
            if cell.contains([',', '"', '\n', '\r']) {
                let _ = write!(self.out, "\"{}\"", cell.replace('"', "\"\""));
            } else {
                self.out.push_str(cell);
            }
        }
        self.out.push_str("\r\n");
    }

    fn finish(self) -> String {
        self.out
    }
}
