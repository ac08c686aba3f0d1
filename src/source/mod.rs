//! Query interfaces and paging helpers.
//!
//! Ownership model:
//! - `EntrySource` is the collector-facing paginator. It knows nothing about
//!   buckets or saturation; the collector decides when to stop paging.
//! - `CallCounter` is owned by whoever drives a run and lent to every
//!   `fetch_page` call, so no source keeps ambient call state.
//! - `InMemoryEntrySource` pages fixed JSON entries for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use crate::config::QueryBy;
use crate::constants::client::{ORDER_BY, OWNER_PUBLIC};
use crate::data::EntryRecord;
use crate::errors::CollectError;
use crate::types::{CodeName, Cursor, QueryId};

/// Blocking HTTP client for the NOMAD entries endpoint.
pub mod nomad;

pub use nomad::NomadClient;

/// One page request against the entries endpoint.
///
/// Always scoped to publicly visible entries and a single grouping value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    query_by: QueryBy,
    value: CodeName,
    page_size: usize,
    cursor: Option<Cursor>,
    fields: Vec<String>,
}

impl QueryRequest {
    /// First-page request for `value`; fails when `page_size` is zero.
    pub fn new(
        query_by: QueryBy,
        value: impl Into<CodeName>,
        page_size: usize,
        fields: Vec<String>,
    ) -> Result<Self, CollectError> {
        if page_size == 0 {
            return Err(CollectError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            query_by,
            value: value.into(),
            page_size,
            cursor: None,
            fields,
        })
    }

    /// Same query continued from `cursor`.
    pub fn with_cursor(&self, cursor: Option<Cursor>) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }

    /// Quantity the query filters on.
    pub fn query_by(&self) -> QueryBy {
        self.query_by
    }

    /// Code or entry point being queried.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Entries requested per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Cursor of the page to fetch; `None` for the first page.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Fields requested through the projection.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Stable identifier of this query, independent of the cursor.
    pub fn query_id(&self) -> QueryId {
        format!("{}={}", self.query_by.quantity(), self.value)
    }

    /// JSON body for `POST entries/query`.
    pub fn body(&self) -> Value {
        let mut pagination = json!({
            "page_size": self.page_size,
            "order_by": ORDER_BY,
            "order": "asc",
        });
        if let Some(cursor) = &self.cursor {
            pagination["page_after_value"] = json!(cursor);
        }
        let mut query = serde_json::Map::new();
        query.insert(self.query_by.quantity().to_string(), json!(self.value));
        let mut body = json!({
            "owner": OWNER_PUBLIC,
            "query": query,
            "pagination": pagination,
        });
        if !self.fields.is_empty() {
            body["required"] = json!({ "include": self.fields });
        }
        body
    }
}

/// One page of results.
#[derive(Clone, Debug, Default)]
pub struct EntryPage {
    /// Entries usable for bucketing, in remote order.
    pub records: Vec<EntryRecord>,
    /// Entries dropped because they lacked an id or an author.
    pub skipped: usize,
    /// Cursor for the next page; `None` once the remote is exhausted.
    pub next_cursor: Option<Cursor>,
}

impl EntryPage {
    /// Decode the `data` array of a query response into a page.
    ///
    /// The page is terminal when it is empty, shorter than the requested
    /// size, or carries no `next_page_after_value`.
    pub fn from_response(
        request: &QueryRequest,
        response: &Value,
        author_quantity: &str,
    ) -> Result<Self, String> {
        let data = match response.get("data") {
            Some(Value::Array(data)) => data.as_slice(),
            Some(Value::Null) | None => &[],
            Some(other) => return Err(format!("`data` is not an array: {other}")),
        };
        let query_id = request.query_id();
        let mut records = Vec::with_capacity(data.len());
        let mut skipped = 0usize;
        for raw in data {
            match EntryRecord::from_json(raw, &query_id, author_quantity) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
        let next_value = response
            .get("pagination")
            .and_then(|pagination| pagination.get("next_page_after_value"))
            .and_then(|value| match value {
                Value::String(value) if !value.is_empty() => Some(value.clone()),
                Value::Number(value) => Some(value.to_string()),
                _ => None,
            });
        let exhausted = data.is_empty() || data.len() < request.page_size();
        Ok(Self {
            records,
            skipped,
            next_cursor: if exhausted { None } else { next_value },
        })
    }
}

/// Collector-facing paginator.
pub trait EntrySource {
    /// Fetch one page. Every remote attempt (retries included) is recorded
    /// in `calls`.
    fn fetch_page(
        &self,
        request: &QueryRequest,
        calls: &CallCounter,
    ) -> Result<EntryPage, CollectError>;
}

/// Run-scoped count of remote calls.
#[derive(Debug, Default)]
pub struct CallCounter {
    calls: AtomicU64,
}

impl CallCounter {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return the new total.
    pub fn record(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Calls recorded so far.
    pub fn total(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Blocking pause used for polite delays and backoff.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// `Sleeper` that blocks the current thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// In-memory entry source for tests and small fixtures.
///
/// Pages raw JSON entries per code with numeric offset cursors. Codes
/// registered through `with_failure` answer every call with that status.
#[derive(Default)]
pub struct InMemoryEntrySource {
    author_quantity: String,
    entries: HashMap<CodeName, Vec<Value>>,
    failures: HashMap<CodeName, u16>,
}

impl InMemoryEntrySource {
    /// Create an empty source reading authors from `author_quantity`.
    pub fn new(author_quantity: impl Into<String>) -> Self {
        Self {
            author_quantity: author_quantity.into(),
            ..Self::default()
        }
    }

    /// Register the full result set for `code`, in remote order.
    pub fn with_entries(mut self, code: impl Into<CodeName>, entries: Vec<Value>) -> Self {
        self.entries.insert(code.into(), entries);
        self
    }

    /// Make every query for `code` fail with `status`.
    pub fn with_failure(mut self, code: impl Into<CodeName>, status: u16) -> Self {
        self.failures.insert(code.into(), status);
        self
    }
}

impl EntrySource for InMemoryEntrySource {
    fn fetch_page(
        &self,
        request: &QueryRequest,
        calls: &CallCounter,
    ) -> Result<EntryPage, CollectError> {
        calls.record();
        if let Some(status) = self.failures.get(request.value()) {
            return Err(CollectError::Api {
                code: request.value().to_string(),
                status: *status,
                body: String::new(),
            });
        }
        let entries = self
            .entries
            .get(request.value())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = match request.cursor() {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|err| CollectError::MalformedResponse {
                    code: request.value().to_string(),
                    reason: format!("invalid cursor '{cursor}': {err}"),
                })?,
            None => 0,
        };
        let start = start.min(entries.len());
        let end = start.saturating_add(request.page_size()).min(entries.len());
        let next = (end < entries.len()).then(|| end.to_string());
        let data = entries[start..end].to_vec();
        let response = json!({
            "data": data,
            "pagination": { "next_page_after_value": next },
        });
        EntryPage::from_response(request, &response, &self.author_quantity).map_err(|reason| {
            CollectError::MalformedResponse {
                code: request.value().to_string(),
                reason,
            }
        })
    }
}
