use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::QueryBy;
use crate::constants::quantities::{DATASETS, ENTRY_ID, METHOD_NAME};
use crate::utils::{normalize_author, value_at_path};

pub use crate::types::{AuthorId, CodeName, DatasetId, EntryId, MethodTag, QueryId};

/// One entry returned by the remote, reduced to the fields the sampler uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Globally unique entry id.
    pub entry_id: EntryId,
    /// Normalized main author.
    pub main_author: AuthorId,
    /// Dataset ids, sorted and deduplicated.
    pub dataset_ids: Vec<DatasetId>,
    /// Method/classification tags in remote order.
    pub methods: Vec<MethodTag>,
    /// Queries that produced this entry.
    pub query_ids: Vec<QueryId>,
}

impl EntryRecord {
    /// Build a record from one raw `data` element of a query response.
    ///
    /// Returns `None` when the entry has no id or no usable author; such
    /// entries cannot be bucketed.
    pub fn from_json(raw: &Value, query_id: &str, author_quantity: &str) -> Option<Self> {
        let entry_id = raw
            .get(ENTRY_ID)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())?
            .to_string();
        let author = value_at_path(raw, author_quantity)
            .filter(|value| !value.is_null())
            .or_else(|| value_at_path(raw, "metadata.main_author"))
            .and_then(normalize_author)?;

        let mut dataset_ids: Vec<DatasetId> = value_at_path(raw, DATASETS)
            .and_then(Value::as_array)
            .map(|datasets| datasets.iter().filter_map(dataset_id).collect())
            .unwrap_or_default();
        dataset_ids.sort();
        dataset_ids.dedup();

        let methods = match value_at_path(raw, METHOD_NAME) {
            Some(Value::String(name)) if !name.trim().is_empty() => vec![name.trim().to_string()],
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            entry_id,
            main_author: author,
            dataset_ids,
            methods,
            query_ids: vec![query_id.to_string()],
        })
    }

    /// Dataset used for dataset-aware bucketing (the smallest id), if any.
    pub fn primary_dataset(&self) -> Option<&DatasetId> {
        self.dataset_ids.first()
    }
}

fn dataset_id(value: &Value) -> Option<DatasetId> {
    let id = match value {
        Value::String(id) => id.as_str(),
        Value::Object(map) => map.get("dataset_id").and_then(Value::as_str)?,
        _ => return None,
    };
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Where a picked entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Selected by an automated scan.
    Scan,
    /// Added by hand to an output file.
    Manual,
}

/// One line of a per-code selection file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickedEntry {
    /// Globally unique entry id.
    pub entry_id: EntryId,
    /// Normalized main author.
    pub main_author: AuthorId,
    /// Dataset ids, sorted.
    #[serde(default)]
    pub dataset_ids: Vec<DatasetId>,
    /// Method/classification tags.
    #[serde(default)]
    pub methods: Vec<MethodTag>,
    /// Queries that produced this entry.
    #[serde(default)]
    pub query_ids: Vec<QueryId>,
    /// Scan or manual origin. Lines without it are rejected.
    pub picked_by: Provenance,
    /// Set when the code was queried by program name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeName>,
    /// Set when the code was queried by parser entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<CodeName>,
    /// Entries scanned in this entry's bucket during the run that wrote it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_entry_count: Option<u64>,
}

impl PickedEntry {
    /// Output line for `record`, labelled with the code it was picked for.
    pub fn new(record: EntryRecord, provenance: Provenance, code: &str, query_by: QueryBy) -> Self {
        let (code, entry_point) = match query_by {
            QueryBy::ProgramName => (Some(code.to_string()), None),
            QueryBy::ParserName => (None, Some(code.to_string())),
        };
        Self {
            entry_id: record.entry_id,
            main_author: record.main_author,
            dataset_ids: record.dataset_ids,
            methods: record.methods,
            query_ids: record.query_ids,
            picked_by: provenance,
            code,
            entry_point,
            bucket_entry_count: None,
        }
    }

    /// Attach the number of entries scanned in this entry's bucket.
    pub fn with_bucket_entry_count(mut self, count: Option<u64>) -> Self {
        self.bucket_entry_count = count;
        self
    }

    /// Split back into the sampler-facing record and its provenance.
    pub fn into_record(self) -> (EntryRecord, Provenance) {
        let mut dataset_ids = self.dataset_ids;
        dataset_ids.sort();
        dataset_ids.dedup();
        (
            EntryRecord {
                entry_id: self.entry_id,
                main_author: self.main_author,
                dataset_ids,
                methods: self.methods,
                query_ids: self.query_ids,
            },
            self.picked_by,
        )
    }
}
