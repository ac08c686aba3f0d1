use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum, error::ErrorKind};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::collector::Collector;
use crate::config::{CollectConfig, QueryBy, RetryPolicy, SelectionMode};
use crate::constants::client::{
    BASE_URL_ENV, DEFAULT_BASE_URL, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS,
};
use crate::constants::quantities::MAIN_AUTHOR;
use crate::constants::sampler::{
    DEFAULT_MAX_AUTHORS_PER_CODE, DEFAULT_MAX_DATASETS_PER_AUTHOR, DEFAULT_PAGE_SIZE,
    DEFAULT_SEED,
};
use crate::metadata::RunMetadata;
use crate::output::{OutputLayout, emit_run};
use crate::source::NomadClient;
use crate::types::CodeName;
use crate::utils::normalize_code_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueryByArg {
    #[value(name = "program_name")]
    ProgramName,
    #[value(name = "parser_name")]
    ParserName,
}

impl From<QueryByArg> for QueryBy {
    fn from(value: QueryByArg) -> Self {
        match value {
            QueryByArg::ProgramName => QueryBy::ProgramName,
            QueryByArg::ParserName => QueryBy::ParserName,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "collect_entries",
    disable_help_subcommand = true,
    about = "Collect representative NOMAD entry ids per code",
    long_about = "Query public NOMAD entries per code and keep a deterministic, author-diverse sample of entry ids, merged with any selection already under the output directory.",
    after_help = "The base URL is resolved in order by explicit arg, the NOMAD_BASE_URL environment variable, then the public NOMAD API."
)]
/// CLI for `collect_entries`.
///
/// Common usage:
/// - One entry per (code, author): `--codes VASP CP2K --outdir corpus`
/// - One entry per (code, author, dataset): add `--dataset-aware`
/// - Every public entry of a code: add `--collect-all`
struct CollectEntriesCli {
    #[arg(long = "base-url", value_name = "URL", help = "API base URL override")]
    base_url: Option<String>,
    #[arg(
        long,
        value_name = "DIR",
        default_value = ".",
        help = "Output root for entries/ and data/"
    )]
    outdir: PathBuf,
    #[arg(
        long,
        required = true,
        num_args = 1..,
        value_name = "CODE",
        help = "Simulation codes or parser names to process"
    )]
    codes: Vec<String>,
    #[arg(
        long = "query-by",
        value_enum,
        default_value = "program_name",
        help = "Remote quantity the codes are matched against"
    )]
    query_by: QueryByArg,
    #[arg(
        long = "author-quantity",
        default_value = MAIN_AUTHOR,
        help = "Remote quantity holding the main author"
    )]
    author_quantity: String,
    #[arg(long, default_value_t = DEFAULT_SEED, help = "Seed mixed into the stable pick hash")]
    seed: u64,
    #[arg(
        long = "page-size",
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = parse_positive_usize,
        help = "Entries requested per page"
    )]
    page_size: usize,
    #[arg(
        long = "polite-sleep",
        value_name = "SECONDS",
        default_value = "0",
        value_parser = parse_seconds,
        help = "Pause before every remote call after the first"
    )]
    polite_sleep: Duration,
    #[arg(
        long = "max-authors-per-code",
        default_value_t = DEFAULT_MAX_AUTHORS_PER_CODE,
        value_parser = parse_positive_usize
    )]
    max_authors_per_code: usize,
    #[arg(
        long = "max-datasets-per-author",
        default_value_t = DEFAULT_MAX_DATASETS_PER_AUTHOR,
        value_parser = parse_positive_usize
    )]
    max_datasets_per_author: usize,
    #[arg(
        long = "min-entries-per-code",
        default_value_t = 0,
        help = "Flag codes ending with fewer picks as under-filled"
    )]
    min_entries_per_code: usize,
    #[arg(
        long = "include-fields",
        num_args = 1..,
        value_name = "FIELD",
        help = "Fields requested for every entry"
    )]
    include_fields: Vec<String>,
    #[arg(
        long = "collect-all",
        help = "Collect every entry instead of one per bucket"
    )]
    collect_all: bool,
    #[arg(
        long = "dataset-aware",
        help = "Bucket by (code, author, dataset) instead of (code, author)"
    )]
    dataset_aware: bool,
    #[arg(
        long = "full-scan",
        help = "Keep paging after every bucket is filled"
    )]
    full_scan: bool,
    #[arg(
        long = "max-attempts",
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Attempts per page request, first try included"
    )]
    max_attempts: u32,
    #[arg(
        long = "initial-backoff",
        value_name = "SECONDS",
        value_parser = parse_seconds,
        help = "Backoff after the first failed attempt; doubles after each failure"
    )]
    initial_backoff: Option<Duration>,
    #[arg(long, help = "Log per-page progress")]
    verbose: bool,
}

impl CollectEntriesCli {
    fn into_config(self, env_base_url: Option<String>) -> (CollectConfig, Vec<CodeName>, PathBuf) {
        let config = CollectConfig {
            base_url: resolve_base_url(self.base_url, env_base_url),
            seed: self.seed,
            page_size: self.page_size,
            max_authors_per_code: self.max_authors_per_code,
            max_datasets_per_author: self.max_datasets_per_author,
            min_entries_per_code: self.min_entries_per_code,
            polite_delay: self.polite_sleep,
            mode: if self.collect_all {
                SelectionMode::CollectAll
            } else {
                SelectionMode::Representative
            },
            dataset_aware: self.dataset_aware,
            query_by: self.query_by.into(),
            author_quantity: self.author_quantity,
            include_fields: self.include_fields,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: self
                    .initial_backoff
                    .unwrap_or(Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS)),
            },
            stop_when_saturated: !self.full_scan,
        };
        (config, self.codes, self.outdir)
    }
}

/// Run the `collect_entries` command line.
///
/// Returns `Ok(None)` when only help or version output was requested, and
/// otherwise the run metadata that was written. Per-code failures are
/// recorded there rather than returned as errors.
pub fn run_collect_entries<I>(args_iter: I) -> Result<Option<RunMetadata>, Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let Some(cli) = parse_cli::<CollectEntriesCli, _>(
        std::iter::once("collect_entries".to_string()).chain(args_iter),
    )?
    else {
        return Ok(None);
    };

    let default_level = if cli.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .try_init();

    let (config, codes, outdir) = cli.into_config(std::env::var(BASE_URL_ENV).ok());
    let codes = check_code_names(codes)?;
    let layout = OutputLayout::new(outdir);
    let client = NomadClient::new(&config);
    info!(
        "[nomad:collect] querying {} for {} codes by {}",
        client.endpoint(),
        codes.len(),
        config.query_by.label()
    );

    let started_at = Utc::now();
    let collector = Collector::new(client, config.clone())?.with_layout(layout.clone());
    let report = collector.collect(&codes);
    let run = emit_run(&layout, &config, &codes, &report, started_at)?;
    info!(
        "[nomad:collect] done: {} codes processed, {} entries picked, {} api calls, {} failures",
        run.codes_processed,
        run.total_picked_entries,
        run.api_calls,
        run.failures.len()
    );
    Ok(Some(run))
}

/// Drop repeated codes and reject distinct codes sharing an output file.
fn check_code_names(codes: Vec<CodeName>) -> Result<Vec<CodeName>, String> {
    if codes.iter().all(|code| code.trim().is_empty()) {
        return Err("at least one non-empty code is required".to_string());
    }
    let mut by_file: IndexMap<String, CodeName> = IndexMap::new();
    for code in codes {
        let file_name = normalize_code_name(&code);
        match by_file.get(&file_name) {
            Some(seen) if *seen == code => {
                warn!("[nomad:collect] code '{}' requested more than once", code);
            }
            Some(seen) => {
                return Err(format!(
                    "codes '{}' and '{}' would both write to '{}'",
                    seen, code, file_name
                ));
            }
            None => {
                by_file.insert(file_name, code);
            }
        }
    }
    Ok(by_file.into_values().collect())
}

fn resolve_base_url(explicit: Option<String>, env: Option<String>) -> String {
    explicit
        .into_iter()
        .chain(env)
        .map(|url| url.trim().to_string())
        .find(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let seconds = raw
        .parse::<f64>()
        .map_err(|_| format!("Could not parse '{}' as seconds", raw))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| format!("'{}' is not a valid duration", raw))
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
