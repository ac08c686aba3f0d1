/// Constants used by the remote query client.
pub mod client {
    /// Default NOMAD API base URL.
    pub const DEFAULT_BASE_URL: &str = "https://nomad-lab.eu/prod/v1/api/v1";
    /// Environment variable consulted when `--base-url` is not given.
    pub const BASE_URL_ENV: &str = "NOMAD_BASE_URL";
    /// Path of the entries search endpoint, relative to the base URL.
    pub const ENTRIES_QUERY_PATH: &str = "entries/query";
    /// Ownership scope attached to every query.
    pub const OWNER_PUBLIC: &str = "public";
    /// Field every page is ordered by; keeps the stream order stable.
    pub const ORDER_BY: &str = "entry_id";
    /// Total attempts for one page request, first try included.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    /// Backoff before the second attempt; doubles after every failure.
    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
    /// Multiplier applied to the backoff after each failed attempt.
    pub const BACKOFF_FACTOR: u32 = 2;
    /// Per-request timeout.
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;
    /// Statuses treated as transient besides the 5xx class.
    pub const RETRYABLE_STATUS: &[u16] = &[429];
}

/// Remote quantity names used to query and project entries.
pub mod quantities {
    /// Quantity holding the simulation program name.
    pub const PROGRAM_NAME: &str = "results.method.simulation.program_name";
    /// Quantity holding the parser identifier.
    pub const PARSER_NAME: &str = "parser_name";
    /// Quantity holding the entry id.
    pub const ENTRY_ID: &str = "entry_id";
    /// Default quantity holding the main author.
    pub const MAIN_AUTHOR: &str = "main_author";
    /// Quantity holding the dataset list.
    pub const DATASETS: &str = "datasets";
    /// Quantity holding the method name tag.
    pub const METHOD_NAME: &str = "results.method.method_name";
}

/// Constants used by the bucket sampler and collector defaults.
pub mod sampler {
    /// Default seed mixed into the stable pick hash.
    pub const DEFAULT_SEED: u64 = 0;
    /// Default remote page size.
    pub const DEFAULT_PAGE_SIZE: usize = 500;
    /// Default cap on distinct authors admitted per code.
    pub const DEFAULT_MAX_AUTHORS_PER_CODE: usize = 25;
    /// Default cap on distinct datasets admitted per author.
    pub const DEFAULT_MAX_DATASETS_PER_AUTHOR: usize = 10;
    /// Separator between seed and entry id in the stable pick hash input.
    pub const PICK_KEY_SEPARATOR: &str = ":";
}

/// Constants describing the on-disk output layout.
pub mod output {
    /// Directory (under the output root) holding per-code selections.
    pub const ENTRIES_DIR: &str = "entries/by_code";
    /// Directory (under the output root) holding aggregate summaries.
    pub const DATA_DIR: &str = "data";
    /// Extension of per-code selection files.
    pub const SELECTION_EXTENSION: &str = "jsonl";
    /// Suffix of per-code metadata files.
    pub const CODE_METADATA_SUFFIX: &str = "_run_metadata.json";
    /// Run metadata filename under the data directory.
    pub const RUN_METADATA_FILENAME: &str = "run_metadata.json";
    /// Aggregate summary: one row per code.
    pub const CODE_OVERVIEW_CSV: &str = "code_overview.csv";
    /// Aggregate summary: one row per code/author.
    pub const CODE_AUTHOR_CSV: &str = "code_author_overview.csv";
    /// Aggregate summary: one row per code/author/dataset.
    pub const CODE_AUTHOR_DATASET_CSV: &str = "code_author_dataset_overview.csv";
    /// Aggregate summary: one row per author/dataset across all codes.
    pub const GLOBAL_AUTHOR_DATASET_CSV: &str = "global_author_dataset_overview.csv";
    /// Fallback name for codes that normalize to nothing.
    pub const UNKNOWN_CODE_NAME: &str = "unknown";
}
