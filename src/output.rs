//! On-disk layout: per-code selection files, metadata, and summaries.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::collector::CollectionReport;
use crate::config::CollectConfig;
use crate::constants::output::{
    CODE_METADATA_SUFFIX, DATA_DIR, ENTRIES_DIR, RUN_METADATA_FILENAME, SELECTION_EXTENSION,
};
use crate::data::PickedEntry;
use crate::errors::CollectError;
use crate::metadata::{CodeRunMetadata, RunMetadata};
use crate::sampler::CodeSelection;
use crate::report::write_summaries;
use crate::types::CodeName;
use crate::utils::normalize_code_name;

/// Paths of everything a run writes under one output root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Layout rooted at `root`; nothing is created until written.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `entries/by_code`
    pub fn entries_dir(&self) -> PathBuf {
        self.root.join(ENTRIES_DIR)
    }

    /// `data`
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// `entries/by_code/<normalized code>.jsonl`
    pub fn selection_path(&self, code: &str) -> PathBuf {
        self.entries_dir().join(format!(
            "{}.{}",
            normalize_code_name(code),
            SELECTION_EXTENSION
        ))
    }

    /// `entries/by_code/<normalized code>_run_metadata.json`
    pub fn code_metadata_path(&self, code: &str) -> PathBuf {
        self.entries_dir()
            .join(format!("{}{}", normalize_code_name(code), CODE_METADATA_SUFFIX))
    }

    /// `data/run_metadata.json`
    pub fn run_metadata_path(&self) -> PathBuf {
        self.data_dir().join(RUN_METADATA_FILENAME)
    }

    /// Path of a summary file under the data directory.
    pub fn summary_path(&self, filename: &str) -> PathBuf {
        self.data_dir().join(filename)
    }

    /// Load the selection a previous run wrote for `code`.
    ///
    /// A missing file is an empty selection. Blank lines are ignored; any
    /// other unreadable line fails with `CorruptOutput` rather than being
    /// dropped.
    pub fn load_selection(&self, code: &str) -> Result<Vec<PickedEntry>, CollectError> {
        let path = self.selection_path(code);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| CollectError::CorruptOutput {
                path: path.clone(),
                line: idx + 1,
                reason: err.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str::<PickedEntry>(&line).map_err(|err| {
                CollectError::CorruptOutput {
                    path: path.clone(),
                    line: idx + 1,
                    reason: err.to_string(),
                }
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Write one JSON object per line for `code`, replacing any previous file.
    pub fn write_selection(
        &self,
        code: &str,
        entries: &[PickedEntry],
    ) -> Result<PathBuf, CollectError> {
        let path = self.selection_path(code);
        write_atomically(&path, |writer| {
            for entry in entries {
                serde_json::to_writer(&mut *writer, entry).map_err(io::Error::other)?;
                writer.write_all(b"\n")?;
            }
            Ok(())
        })?;
        Ok(path)
    }

    /// Pretty-print `value` as JSON to `path`.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CollectError> {
        write_atomically(path, |writer| {
            serde_json::to_writer_pretty(&mut *writer, value).map_err(io::Error::other)?;
            writer.write_all(b"\n")
        })
    }

    /// Every per-code metadata file currently under the entries directory,
    /// sorted by code.
    pub fn load_code_metadata(&self) -> Result<Vec<CodeRunMetadata>, CollectError> {
        let dir = self.entries_dir();
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut paths: Vec<PathBuf> = Vec::new();
        for item in listing {
            let path = item?.path();
            let is_metadata = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(CODE_METADATA_SUFFIX));
            if is_metadata && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = fs::read_to_string(&path)?;
            let record = serde_json::from_str::<CodeRunMetadata>(&raw).map_err(|err| {
                CollectError::CorruptOutput {
                    path: path.clone(),
                    line: err.line(),
                    reason: err.to_string(),
                }
            })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(records)
    }
}

/// Persist one finished collection and return the run metadata written.
///
/// Successful codes get their selection (only when non-empty) and metadata
/// files. Collection failures, and codes whose files cannot be written, are
/// recorded in the run metadata; only run-level writes fail the call.
/// Summaries are rebuilt
/// from every per-code metadata file present, so codes from earlier runs
/// stay in the aggregates.
pub fn emit_run(
    layout: &OutputLayout,
    config: &CollectConfig,
    codes: &[CodeName],
    report: &CollectionReport,
    started_at: DateTime<Utc>,
) -> Result<RunMetadata, CollectError> {
    fs::create_dir_all(layout.entries_dir())?;
    fs::create_dir_all(layout.data_dir())?;

    let mut run = RunMetadata::start(config, codes, started_at);
    for outcome in &report.outcomes {
        let selection = match &outcome.result {
            Ok(selection) => selection,
            Err(err) => {
                run.record_failure(&outcome.code, err);
                continue;
            }
        };
        if let Err(err) = write_code_outputs(layout, config, selection) {
            warn!(
                "[nomad:output] could not write outputs for code '{}': {}",
                selection.code, err
            );
            run.record_failure(&outcome.code, err);
            continue;
        }
        run.record_selection(selection);
    }

    let summaries = write_summaries(layout)?;
    info!(
        "[nomad:output] summaries cover {} codes",
        summaries.code_overview.len()
    );

    run.api_calls = report.api_calls;
    run.finished_at = Utc::now();
    for warning in &run.warnings {
        warn!("[nomad:output] {}", warning);
    }
    layout.write_json(&layout.run_metadata_path(), &run)?;
    Ok(run)
}

/// Selection file (only when non-empty) and metadata for one code.
fn write_code_outputs(
    layout: &OutputLayout,
    config: &CollectConfig,
    selection: &CodeSelection,
) -> Result<(), CollectError> {
    if selection.entries.is_empty() {
        info!("[nomad:output] no picks for code '{}'", selection.code);
    } else {
        let path =
            layout.write_selection(&selection.code, &selection.picked_entries(config.query_by))?;
        info!(
            "[nomad:output] wrote {} entries to {}",
            selection.entries.len(),
            path.display()
        );
    }
    let metadata = CodeRunMetadata::new(config, selection, Utc::now());
    layout.write_json(&layout.code_metadata_path(&selection.code), &metadata)
}

/// Write through a sibling `.part` file and rename it into place.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), CollectError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let mut writer = BufWriter::new(File::create(&partial)?);
    write(&mut writer)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&partial, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Provenance;
    use tempfile::tempdir;

    fn picked(id: &str, author: &str) -> PickedEntry {
        PickedEntry {
            entry_id: id.to_string(),
            main_author: author.to_string(),
            dataset_ids: Vec::new(),
            methods: Vec::new(),
            query_ids: Vec::new(),
            picked_by: Provenance::Scan,
            code: Some("VASP".to_string()),
            entry_point: None,
            bucket_entry_count: None,
        }
    }

    #[test]
    fn paths_use_normalized_code_names() {
        let layout = OutputLayout::new("/out");
        assert_eq!(
            layout.selection_path("VASP 6/x"),
            PathBuf::from("/out/entries/by_code/VASP_6_x.jsonl")
        );
        assert_eq!(
            layout.code_metadata_path("VASP"),
            PathBuf::from("/out/entries/by_code/VASP_run_metadata.json")
        );
        assert_eq!(
            layout.run_metadata_path(),
            PathBuf::from("/out/data/run_metadata.json")
        );
    }

    #[test]
    fn missing_selection_loads_empty() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        assert!(layout.load_selection("VASP").unwrap().is_empty());
        assert!(layout.load_code_metadata().unwrap().is_empty());
    }

    #[test]
    fn selection_round_trips_and_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let entries = vec![picked("e1", "A"), picked("e2", "B")];
        let path = layout.write_selection("VASP", &entries).unwrap();
        assert!(!path.with_extension("jsonl.part").exists());

        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push('\n');
        fs::write(&path, raw).unwrap();
        assert_eq!(layout.load_selection("VASP").unwrap(), entries);
    }

    #[test]
    fn corrupt_line_reports_its_position() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let path = layout.selection_path("VASP");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let good = serde_json::to_string(&picked("e1", "A")).unwrap();
        fs::write(&path, format!("{good}\n{{not json\n")).unwrap();

        match layout.load_selection("VASP").unwrap_err() {
            CollectError::CorruptOutput { line, path: at, .. } => {
                assert_eq!(line, 2);
                assert_eq!(at, path);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn line_without_provenance_is_corrupt() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let path = layout.selection_path("VASP");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{\"entry_id\":\"e1\",\"main_author\":\"A\"}\n").unwrap();
        assert!(matches!(
            layout.load_selection("VASP"),
            Err(CollectError::CorruptOutput { line: 1, .. })
        ));
    }
}
