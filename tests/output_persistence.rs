use std::fs;

use chrono::Utc;
use serde_json::{Value, json};
use tempfile::tempdir;

use nomad_sampler::constants::output::{CODE_AUTHOR_CSV, CODE_OVERVIEW_CSV};
use nomad_sampler::constants::quantities::MAIN_AUTHOR;
use nomad_sampler::{
    CodeRunMetadata, CollectConfig, CollectError, Collector, InMemoryEntrySource, OutputLayout,
    PickedEntry, Provenance, RunMetadata, emit_run,
};

fn entry(id: &str, author: &str) -> Value {
    json!({"entry_id": id, "main_author": {"name": author}, "datasets": [{"dataset_id": "d1"}]})
}

fn vasp_entries() -> Vec<Value> {
    (0..12)
        .map(|idx| entry(&format!("vasp-{idx:02}"), &format!("author-{}", idx % 3)))
        .collect()
}

fn config() -> CollectConfig {
    CollectConfig {
        page_size: 5,
        max_authors_per_code: 3,
        ..CollectConfig::default()
    }
}

fn run(layout: &OutputLayout, source: InMemoryEntrySource, codes: &[&str]) -> RunMetadata {
    run_with(layout, source, codes, config())
}

fn run_with(
    layout: &OutputLayout,
    source: InMemoryEntrySource,
    codes: &[&str],
    config: CollectConfig,
) -> RunMetadata {
    let codes: Vec<String> = codes.iter().map(|code| code.to_string()).collect();
    let collector = Collector::new(source, config.clone())
        .unwrap()
        .with_layout(layout.clone());
    let report = collector.collect(&codes);
    emit_run(layout, &config, &codes, &report, Utc::now()).unwrap()
}

fn vasp_source() -> InMemoryEntrySource {
    InMemoryEntrySource::new(MAIN_AUTHOR).with_entries("VASP", vasp_entries())
}

#[test]
fn rerun_against_unchanged_remote_is_byte_identical() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());

    let first = run(&layout, vasp_source(), &["VASP"]);
    assert!(first.succeeded());
    assert_eq!(first.total_picked_entries, 3);
    let written = fs::read(layout.selection_path("VASP")).unwrap();

    let second = run(&layout, vasp_source(), &["VASP"]);
    assert_eq!(second.total_picked_entries, 3);
    assert_eq!(fs::read(layout.selection_path("VASP")).unwrap(), written);

    let metadata: CodeRunMetadata =
        serde_json::from_str(&fs::read_to_string(layout.code_metadata_path("VASP")).unwrap())
            .unwrap();
    assert_eq!(metadata.stats.pinned, 3);
    assert_eq!(metadata.stats.entries_picked, 3);
}

#[test]
fn hand_added_entries_survive_reruns() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    run(&layout, vasp_source(), &["VASP"]);

    let manual = PickedEntry {
        entry_id: "manual-1".to_string(),
        main_author: "curator".to_string(),
        dataset_ids: Vec::new(),
        methods: Vec::new(),
        query_ids: Vec::new(),
        picked_by: Provenance::Manual,
        code: Some("VASP".to_string()),
        entry_point: None,
        bucket_entry_count: None,
    };
    let mut existing = layout.load_selection("VASP").unwrap();
    existing.push(manual.clone());
    layout.write_selection("VASP", &existing).unwrap();

    let rerun = run(&layout, vasp_source(), &["VASP"]);
    assert_eq!(rerun.total_picked_entries, 4);
    let reloaded = layout.load_selection("VASP").unwrap();
    assert!(reloaded.contains(&manual));
    assert_eq!(
        reloaded
            .iter()
            .filter(|entry| entry.picked_by == Provenance::Scan)
            .count(),
        3
    );
}

#[test]
fn under_filled_code_is_flagged_but_written() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let config = CollectConfig {
        min_entries_per_code: 5,
        ..config()
    };
    let run = run_with(&layout, vasp_source(), &["VASP"], config);

    assert!(run.succeeded());
    assert_eq!(run.codes_processed, 1);
    assert_eq!(run.warnings.len(), 1);
    assert!(run.warnings[0].contains("under-filled"));
    assert_eq!(layout.load_selection("VASP").unwrap().len(), 3);

    let metadata: CodeRunMetadata =
        serde_json::from_str(&fs::read_to_string(layout.code_metadata_path("VASP")).unwrap())
            .unwrap();
    assert!(metadata.under_filled);
    let overview = fs::read_to_string(layout.summary_path(CODE_OVERVIEW_CSV)).unwrap();
    assert!(overview.lines().nth(1).unwrap().ends_with(",true"));
}

#[test]
fn failing_code_is_isolated_and_recorded() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let source = vasp_source().with_failure("CP2K", 500);
    let run = run(&layout, source, &["CP2K", "VASP"]);

    assert!(!run.succeeded());
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].code, "CP2K");
    assert!(run.failures[0].error.contains("500"));
    assert_eq!(run.codes_processed, 1);
    assert!(layout.selection_path("VASP").exists());
    assert!(!layout.selection_path("CP2K").exists());
    assert!(!layout.code_metadata_path("CP2K").exists());

    let persisted: Value =
        serde_json::from_str(&fs::read_to_string(layout.run_metadata_path()).unwrap()).unwrap();
    assert_eq!(persisted["failures"][0]["code"], "CP2K");
    assert_eq!(persisted["codes"], json!(["CP2K", "VASP"]));
}

#[test]
fn unwritable_selection_fails_only_that_code() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let mut blocked = layout.selection_path("AAA").into_os_string();
    blocked.push(".part");
    fs::create_dir_all(&blocked).unwrap();

    let source = InMemoryEntrySource::new(MAIN_AUTHOR)
        .with_entries("AAA", vec![entry("aaa-1", "author-1")])
        .with_entries("BBB", vec![entry("bbb-1", "author-2")]);
    let run = run(&layout, source, &["AAA", "BBB"]);

    assert!(!run.succeeded());
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].code, "AAA");
    assert_eq!(run.codes_processed, 1);
    assert_eq!(run.total_picked_entries, 1);
    assert!(!layout.selection_path("AAA").exists());
    assert!(!layout.code_metadata_path("AAA").exists());
    assert_eq!(layout.load_selection("BBB").unwrap().len(), 1);
    assert!(layout.run_metadata_path().exists());

    let overview = fs::read_to_string(layout.summary_path(CODE_OVERVIEW_CSV)).unwrap();
    assert_eq!(overview.lines().count(), 2);
    assert!(overview.lines().nth(1).unwrap().starts_with("BBB,"));
}

#[test]
fn picked_lines_carry_bucket_entry_count() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    run(&layout, vasp_source(), &["VASP"]);

    let picked = layout.load_selection("VASP").unwrap();
    let counts: Vec<(String, Option<u64>)> = picked
        .into_iter()
        .map(|entry| (entry.main_author, entry.bucket_entry_count))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("author-0".to_string(), Some(2)),
            ("author-1".to_string(), Some(2)),
            ("author-2".to_string(), Some(1)),
        ]
    );
}

#[test]
fn corrupt_previous_output_fails_only_that_code() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let path = layout.selection_path("VASP");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{\"entry_id\": \"e1\"\n").unwrap();

    let codes = vec!["VASP".to_string()];
    let collector = Collector::new(vasp_source(), config())
        .unwrap()
        .with_layout(layout.clone());
    let report = collector.collect(&codes);
    assert!(matches!(
        report.outcomes[0].result,
        Err(CollectError::CorruptOutput { line: 1, .. })
    ));
    assert_eq!(report.api_calls, 0);

    let run = emit_run(&layout, &config(), &codes, &report, Utc::now()).unwrap();
    assert!(!run.succeeded());
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "{\"entry_id\": \"e1\"\n"
    );
}

#[test]
fn summaries_keep_codes_from_earlier_runs() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    run(&layout, vasp_source(), &["VASP"]);

    let cp2k = InMemoryEntrySource::new(MAIN_AUTHOR)
        .with_entries("CP2K", vec![entry("cp2k-1", "author-9")]);
    run(&layout, cp2k, &["CP2K"]);

    let overview = fs::read_to_string(layout.summary_path(CODE_OVERVIEW_CSV)).unwrap();
    let codes: Vec<&str> = overview
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(codes, vec!["CP2K", "VASP"]);

    let by_author = fs::read_to_string(layout.summary_path(CODE_AUTHOR_CSV)).unwrap();
    assert_eq!(by_author.lines().count(), 1 + 1 + 3);
}

#[test]
fn empty_code_writes_metadata_but_no_selection() {
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let run = run(&layout, InMemoryEntrySource::new(MAIN_AUTHOR), &["Nothing Here"]);

    assert!(run.succeeded());
    assert_eq!(run.total_picked_entries, 0);
    assert!(!layout.selection_path("Nothing Here").exists());
    assert!(layout.code_metadata_path("Nothing Here").exists());
    assert!(
        layout
            .code_metadata_path("Nothing Here")
            .ends_with("Nothing_Here_run_metadata.json")
    );
}
