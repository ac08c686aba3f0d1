#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Command-line runner for `collect_entries`.
pub mod app;
/// Per-code collection orchestrator.
pub mod collector;
/// Collection configuration types.
pub mod config;
/// Centralized constants used across the client, sampler, and output.
pub mod constants;
/// Entry records and selection file lines.
pub mod data;
/// Stable pick hashing.
pub mod hash;
/// Run and per-code metadata records.
pub mod metadata;
/// Aggregate metrics helpers.
pub mod metrics;
/// Output layout and persistence.
pub mod output;
/// Aggregate CSV summaries.
pub mod report;
/// Bucket sampler and selection statistics.
pub mod sampler;
/// Entry sources and query types.
pub mod source;
/// Shared type aliases.
pub mod types;
/// Normalization helpers.
pub mod utils;

mod errors;

pub use collector::{CodeOutcome, CollectionReport, Collector};
pub use config::{CollectConfig, QueryBy, RetryPolicy, SelectionMode};
pub use data::{EntryRecord, PickedEntry, Provenance};
pub use errors::CollectError;
pub use hash::{PickKey, stable_pick, stable_pick_key};
pub use metadata::{CodeFailure, CodeRunMetadata, RunMetadata};
pub use output::{OutputLayout, emit_run};
pub use report::{Summaries, build_summaries, write_summaries};
pub use sampler::{
    AdmitDecision, BucketKey, CodeSelection, CodeStats, SamplingRules, SelectionState,
    is_saturated, merge,
};
pub use source::{
    CallCounter, EntryPage, EntrySource, InMemoryEntrySource, NomadClient, QueryRequest, Sleeper,
    ThreadSleeper,
};
pub use types::{AuthorId, CodeName, Cursor, DatasetId, EntryId, LogMessage, MethodTag, QueryId};
pub use utils::normalize_code_name;
