//! Bucket sampler: per-code admission of entries under diversity caps.
//!
//! A `SelectionState` is created for one code, optionally seeded with the
//! entries a previous run picked, fed every record the query stream yields,
//! and finally frozen into a `CodeSelection`.
//!
//! In representative mode every `BucketKey` keeps its best candidate, the one
//! with the smallest `stable_pick_key`. Authors are ranked by the smallest
//! entry id seen for them, and datasets within an author the same way; the
//! author and dataset caps select the best-ranked ones. Each rule is a
//! minimum over the records offered, so the selection does not depend on the
//! order they arrive in. A better-ranked author arriving late pushes the
//! worst-ranked one out of the selection; its buckets stay as candidates.
//!
//! Entries carried over from a previous run are pinned. Their buckets,
//! authors and datasets are always selected and count towards the caps.

use std::collections::{BTreeSet, HashSet};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::config::{CollectConfig, QueryBy, SelectionMode};
use crate::data::{EntryRecord, PickedEntry, Provenance};
use crate::hash::{PickKey, stable_pick_key};
use crate::metrics::{AuthorSkew, author_skew};
use crate::types::{AuthorId, CodeName, DatasetId, EntryId};

/// Grouping tuple used for capacity enforcement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    /// Code or entry point the bucket belongs to.
    pub code: CodeName,
    /// Normalized main author.
    pub author: AuthorId,
    /// Primary dataset; only set in dataset-aware mode.
    pub dataset: Option<DatasetId>,
}

/// Outcome of offering one record to a `SelectionState`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmitDecision {
    /// Filled a new bucket (or, in collect-all mode, a new id) and is selected.
    Accepted,
    /// Displaced the bucket's previous holder, which had a larger pick key.
    Replaced {
        /// Entry id of the displaced holder.
        evicted: EntryId,
    },
    /// The entry id is already held for this code.
    RejectedDuplicate,
    /// The bucket is pinned, or its holder wins the tie-break.
    RejectedCapacity,
    /// The author ranks outside the authors the cap admits. The record stays
    /// a candidate and is selected if its author later moves up.
    RejectedAuthorCap,
    /// The dataset ranks outside the datasets the cap admits for its author.
    RejectedDatasetCap,
}

impl AdmitDecision {
    /// True when the record is part of the selection right after admission.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Accepted | Self::Replaced { .. })
    }
}

/// Admission rules derived from the collection config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingRules {
    /// Bucket capacity mode.
    pub mode: SelectionMode,
    /// Seed mixed into the pick key.
    pub seed: u64,
    /// Key buckets by primary dataset as well as author.
    pub dataset_aware: bool,
    /// Authors selected per code, pinned ones included.
    pub max_authors_per_code: usize,
    /// Datasets selected per author in dataset-aware mode.
    pub max_datasets_per_author: usize,
}

impl SamplingRules {
    /// Rules for `config`.
    pub fn from_config(config: &CollectConfig) -> Self {
        Self {
            mode: config.mode,
            seed: config.seed,
            dataset_aware: config.dataset_aware,
            max_authors_per_code: config.max_authors_per_code,
            max_datasets_per_author: config.max_datasets_per_author,
        }
    }
}

/// One selected entry plus where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmittedEntry {
    /// The entry as received or as loaded from a previous selection.
    pub record: EntryRecord,
    /// Scan or manual origin, carried into the selection file.
    pub provenance: Provenance,
    /// Carried over from a previous run; never displaced.
    pub pinned: bool,
    /// Entries scanned in its bucket. Set by `finalize` in representative mode.
    pub bucket_entry_count: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Bucket {
    entry: AdmittedEntry,
    pick_key: PickKey,
}

/// Smallest entry id seen for one author, and per dataset of that author.
#[derive(Clone, Debug, PartialEq, Eq)]
struct AuthorRank {
    first_entry: EntryId,
    datasets: IndexMap<Option<DatasetId>, EntryId>,
    dataset_order: BTreeSet<(EntryId, Option<DatasetId>)>,
}

impl AuthorRank {
    fn new(entry_id: &EntryId) -> Self {
        Self {
            first_entry: entry_id.clone(),
            datasets: IndexMap::new(),
            dataset_order: BTreeSet::new(),
        }
    }

    fn observe_dataset(&mut self, dataset: &Option<DatasetId>, entry_id: &EntryId) {
        if let Some(first) = self.datasets.get_mut(dataset) {
            if *first <= *entry_id {
                return;
            }
            self.dataset_order.remove(&(first.clone(), dataset.clone()));
            *first = entry_id.clone();
        } else {
            self.datasets.insert(dataset.clone(), entry_id.clone());
        }
        self.dataset_order
            .insert((entry_id.clone(), dataset.clone()));
    }
}

/// Per-decision counters for one code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTally {
    /// Records that filled a new bucket.
    pub accepted: u64,
    /// Records that displaced a bucket holder.
    pub replaced: u64,
    /// Records whose id was already held.
    pub duplicate: u64,
    /// Records that lost the tie-break or hit a pinned bucket.
    pub capacity: u64,
    /// Records outside the admitted authors when offered.
    pub author_cap: u64,
    /// Records outside their author's admitted datasets when offered.
    pub dataset_cap: u64,
}

impl DecisionTally {
    fn record(&mut self, decision: &AdmitDecision) {
        let counter = match decision {
            AdmitDecision::Accepted => &mut self.accepted,
            AdmitDecision::Replaced { .. } => &mut self.replaced,
            AdmitDecision::RejectedDuplicate => &mut self.duplicate,
            AdmitDecision::RejectedCapacity => &mut self.capacity,
            AdmitDecision::RejectedAuthorCap => &mut self.author_cap,
            AdmitDecision::RejectedDatasetCap => &mut self.dataset_cap,
        };
        *counter += 1;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct AuthorTally {
    entries: u64,
    datasets: IndexMap<Option<DatasetId>, u64>,
}

/// Mutable per-code selection state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionState {
    code: CodeName,
    rules: SamplingRules,
    pinned: Vec<AdmittedEntry>,
    pinned_buckets: HashSet<BucketKey>,
    /// Authors with pinned entries and the bucket datasets those cover.
    pinned_authors: IndexMap<AuthorId, IndexSet<Option<DatasetId>>>,
    /// Best candidate per bucket, selected or not.
    buckets: IndexMap<BucketKey, Bucket>,
    bucket_counts: IndexMap<BucketKey, u64>,
    /// Collect-all picks.
    collected: Vec<AdmittedEntry>,
    held_ids: HashSet<EntryId>,
    ranks: IndexMap<AuthorId, AuthorRank>,
    author_order: BTreeSet<(EntryId, AuthorId)>,
    scanned: IndexMap<AuthorId, AuthorTally>,
    skipped: u64,
    decisions: DecisionTally,
}

impl SelectionState {
    /// Empty state for `code`.
    pub fn new(code: impl Into<CodeName>, rules: SamplingRules) -> Self {
        Self {
            code: code.into(),
            rules,
            pinned: Vec::new(),
            pinned_buckets: HashSet::new(),
            pinned_authors: IndexMap::new(),
            buckets: IndexMap::new(),
            bucket_counts: IndexMap::new(),
            collected: Vec::new(),
            held_ids: HashSet::new(),
            ranks: IndexMap::new(),
            author_order: BTreeSet::new(),
            scanned: IndexMap::new(),
            skipped: 0,
            decisions: DecisionTally::default(),
        }
    }

    /// Code this state selects for.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Admission rules in effect.
    pub fn rules(&self) -> &SamplingRules {
        &self.rules
    }

    /// Currently selected entries: pinned ones first, then by first use of
    /// their bucket.
    pub fn entries(&self) -> Vec<&AdmittedEntry> {
        self.selected().collect()
    }

    /// Number of currently selected entries.
    pub fn len(&self) -> usize {
        self.selected().count()
    }

    /// True when nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct selected authors.
    pub fn author_count(&self) -> usize {
        self.selected_authors().len()
    }

    /// Number of records offered through `admit`, skipped ones excluded.
    pub fn scanned_count(&self) -> u64 {
        self.scanned.values().map(|tally| tally.entries).sum()
    }

    /// Decisions taken so far.
    pub fn decisions(&self) -> &DecisionTally {
        &self.decisions
    }

    /// True when `entry_id` is currently selected.
    pub fn contains(&self, entry_id: &str) -> bool {
        self.selected()
            .any(|entry| entry.record.entry_id == entry_id)
    }

    /// Count entries the remote returned but that could not be bucketed.
    pub fn note_skipped(&mut self, skipped: usize) {
        self.skipped += skipped as u64;
    }

    /// Bucket key for `record` under the active grouping.
    pub fn bucket_key(&self, record: &EntryRecord) -> BucketKey {
        key_for(&self.code, self.rules.dataset_aware, record)
    }

    /// Seed entries picked by a previous run.
    ///
    /// Seeded entries are pinned: they block their bucket, count towards the
    /// author and dataset caps, and are kept even when the caps are already
    /// exceeded. Repeated ids keep their first occurrence. Returns the number
    /// of entries seeded.
    pub fn seed<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (EntryRecord, Provenance)>,
    {
        let mut seeded = 0;
        for (record, provenance) in entries {
            if self.held_ids.contains(&record.entry_id) {
                continue;
            }
            let key = self.bucket_key(&record);
            self.observe_rank(&key, &record.entry_id);
            self.pinned_authors
                .entry(key.author.clone())
                .or_default()
                .insert(key.dataset.clone());
            self.pinned_buckets.insert(key);
            self.held_ids.insert(record.entry_id.clone());
            self.pinned.push(AdmittedEntry {
                record,
                provenance,
                pinned: true,
                bucket_entry_count: None,
            });
            seeded += 1;
        }
        seeded
    }

    /// Offer one record from the query stream.
    pub fn admit(&mut self, record: EntryRecord) -> AdmitDecision {
        self.tally_scanned(&record);
        if self.rules.mode == SelectionMode::Representative {
            let key = self.bucket_key(&record);
            *self.bucket_counts.entry(key).or_default() += 1;
        }
        let decision = if self.held_ids.contains(&record.entry_id) {
            AdmitDecision::RejectedDuplicate
        } else {
            match self.rules.mode {
                SelectionMode::CollectAll => self.admit_any(record),
                SelectionMode::Representative => self.admit_representative(record),
            }
        };
        self.decisions.record(&decision);
        decision
    }

    /// Offer every record of a page, in order.
    pub fn admit_all<I>(&mut self, records: I) -> Vec<AdmitDecision>
    where
        I: IntoIterator<Item = EntryRecord>,
    {
        records.into_iter().map(|record| self.admit(record)).collect()
    }

    fn tally_scanned(&mut self, record: &EntryRecord) {
        let tally = self.scanned.entry(record.main_author.clone()).or_default();
        tally.entries += 1;
        if record.dataset_ids.is_empty() {
            *tally.datasets.entry(None).or_default() += 1;
        }
        for dataset in &record.dataset_ids {
            *tally.datasets.entry(Some(dataset.clone())).or_default() += 1;
        }
    }

    fn admit_any(&mut self, record: EntryRecord) -> AdmitDecision {
        self.held_ids.insert(record.entry_id.clone());
        self.collected.push(AdmittedEntry {
            record,
            provenance: Provenance::Scan,
            pinned: false,
            bucket_entry_count: None,
        });
        AdmitDecision::Accepted
    }

    fn admit_representative(&mut self, record: EntryRecord) -> AdmitDecision {
        let key = self.bucket_key(&record);
        self.observe_rank(&key, &record.entry_id);
        if self.pinned_buckets.contains(&key) {
            return AdmitDecision::RejectedCapacity;
        }

        let entry_id = record.entry_id.clone();
        let pick_key = stable_pick_key(self.rules.seed, &entry_id);
        let candidate = Bucket {
            entry: AdmittedEntry {
                record,
                provenance: Provenance::Scan,
                pinned: false,
                bucket_entry_count: None,
            },
            pick_key,
        };
        let evicted = if let Some(bucket) = self.buckets.get_mut(&key) {
            if bucket.pick_key <= pick_key {
                return AdmitDecision::RejectedCapacity;
            }
            let previous = std::mem::replace(bucket, candidate);
            Some(previous.entry.record.entry_id)
        } else {
            self.buckets.insert(key.clone(), candidate);
            None
        };
        if let Some(evicted) = &evicted {
            self.held_ids.remove(evicted);
        }
        self.held_ids.insert(entry_id);

        if !self.author_admitted(&key.author) {
            return AdmitDecision::RejectedAuthorCap;
        }
        if !self.dataset_admitted(&key.author, &key.dataset) {
            return AdmitDecision::RejectedDatasetCap;
        }
        match evicted {
            Some(evicted) => AdmitDecision::Replaced { evicted },
            None => AdmitDecision::Accepted,
        }
    }

    /// Lower the author and dataset ranks for `key` to `entry_id` if smaller.
    fn observe_rank(&mut self, key: &BucketKey, entry_id: &EntryId) {
        if let Some(rank) = self.ranks.get_mut(&key.author) {
            if *entry_id < rank.first_entry {
                self.author_order
                    .remove(&(rank.first_entry.clone(), key.author.clone()));
                rank.first_entry = entry_id.clone();
                self.author_order
                    .insert((entry_id.clone(), key.author.clone()));
            }
            rank.observe_dataset(&key.dataset, entry_id);
        } else {
            let mut rank = AuthorRank::new(entry_id);
            rank.observe_dataset(&key.dataset, entry_id);
            self.ranks.insert(key.author.clone(), rank);
            self.author_order
                .insert((entry_id.clone(), key.author.clone()));
        }
    }

    fn author_admitted(&self, author: &AuthorId) -> bool {
        if self.pinned_authors.contains_key(author) {
            return true;
        }
        let slots = self
            .rules
            .max_authors_per_code
            .saturating_sub(self.pinned_authors.len());
        self.author_order
            .iter()
            .filter(|(_, ranked)| !self.pinned_authors.contains_key(ranked))
            .take(slots)
            .any(|(_, ranked)| ranked == author)
    }

    fn dataset_admitted(&self, author: &AuthorId, dataset: &Option<DatasetId>) -> bool {
        if !self.rules.dataset_aware {
            return true;
        }
        let pinned = self.pinned_authors.get(author);
        if pinned.is_some_and(|datasets| datasets.contains(dataset)) {
            return true;
        }
        let slots = self
            .rules
            .max_datasets_per_author
            .saturating_sub(pinned.map_or(0, |datasets| datasets.len()));
        let Some(rank) = self.ranks.get(author) else {
            return false;
        };
        rank.dataset_order
            .iter()
            .filter(|(_, ranked)| !pinned.is_some_and(|datasets| datasets.contains(ranked)))
            .take(slots)
            .any(|(_, ranked)| ranked == dataset)
    }

    fn is_selected(&self, key: &BucketKey) -> bool {
        !self.pinned_buckets.contains(key)
            && self.author_admitted(&key.author)
            && self.dataset_admitted(&key.author, &key.dataset)
    }

    fn selected(&self) -> impl Iterator<Item = &AdmittedEntry> {
        self.pinned
            .iter()
            .chain(
                self.buckets
                    .iter()
                    .filter(|(key, _)| self.is_selected(key))
                    .map(|(_, bucket)| &bucket.entry),
            )
            .chain(self.collected.iter())
    }

    /// Selected authors with the bucket datasets selected for each.
    fn selected_authors(&self) -> IndexMap<&AuthorId, IndexSet<Option<&DatasetId>>> {
        let mut authors: IndexMap<&AuthorId, IndexSet<Option<&DatasetId>>> = IndexMap::new();
        for entry in self.selected() {
            let dataset = if self.rules.dataset_aware {
                entry.record.primary_dataset()
            } else {
                None
            };
            authors
                .entry(&entry.record.main_author)
                .or_default()
                .insert(dataset);
        }
        authors
    }

    /// Freeze the state into its final, sorted selection.
    ///
    /// Entries are ordered by author, primary dataset when dataset-aware,
    /// then entry id, so the output does not depend on arrival order.
    pub fn finalize(self, min_entries_per_code: usize) -> CodeSelection {
        let stats = self.stats();
        let keep: Vec<bool> = self.buckets.keys().map(|key| self.is_selected(key)).collect();
        let Self {
            code,
            rules,
            pinned,
            buckets,
            bucket_counts,
            collected,
            ..
        } = self;
        let mut entries: Vec<AdmittedEntry> = pinned
            .into_iter()
            .chain(
                buckets
                    .into_values()
                    .zip(keep)
                    .filter_map(|(bucket, keep)| keep.then_some(bucket.entry)),
            )
            .chain(collected)
            .collect();
        if rules.mode == SelectionMode::Representative {
            for entry in &mut entries {
                let key = key_for(&code, rules.dataset_aware, &entry.record);
                entry.bucket_entry_count = bucket_counts.get(&key).copied();
            }
        }
        entries.sort_by(|left, right| {
            sort_key(&left.record, rules.dataset_aware)
                .cmp(&sort_key(&right.record, rules.dataset_aware))
        });
        let under_filled = entries.len() < min_entries_per_code;
        CodeSelection {
            code,
            entries,
            stats,
            under_filled,
            min_entries: min_entries_per_code,
        }
    }

    fn stats(&self) -> CodeStats {
        let mut picked_per_author: IndexMap<&AuthorId, u64> = IndexMap::new();
        let mut picked_datasets: IndexSet<&DatasetId> = IndexSet::new();
        let mut picked = 0u64;
        for entry in self.selected() {
            picked += 1;
            *picked_per_author
                .entry(&entry.record.main_author)
                .or_default() += 1;
            picked_datasets.extend(entry.record.dataset_ids.iter());
        }
        let mut scanned_datasets: IndexSet<&DatasetId> = IndexSet::new();
        let mut authors: Vec<AuthorStats> = self
            .scanned
            .iter()
            .map(|(author, tally)| {
                scanned_datasets.extend(tally.datasets.keys().flatten());
                let mut datasets: Vec<DatasetStats> = tally
                    .datasets
                    .iter()
                    .map(|(dataset_id, n_entries)| DatasetStats {
                        dataset_id: dataset_id.clone(),
                        n_entries: *n_entries,
                    })
                    .collect();
                datasets.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
                AuthorStats {
                    main_author: author.clone(),
                    n_entries: tally.entries,
                    n_picked: picked_per_author.get(author).copied().unwrap_or(0),
                    datasets,
                }
            })
            .collect();
        // Seeded authors that the stream no longer returns still show up.
        for (author, picked) in &picked_per_author {
            if !self.scanned.contains_key(*author) {
                authors.push(AuthorStats {
                    main_author: (*author).clone(),
                    n_entries: 0,
                    n_picked: *picked,
                    datasets: Vec::new(),
                });
            }
        }
        authors.sort_by(|a, b| a.main_author.cmp(&b.main_author));

        CodeStats {
            entries_scanned: self.scanned_count(),
            entries_skipped: self.skipped,
            entries_picked: picked,
            authors_scanned: self.scanned.len() as u64,
            authors_picked: picked_per_author.len() as u64,
            datasets_scanned: scanned_datasets.len() as u64,
            datasets_picked: picked_datasets.len() as u64,
            pinned: self.pinned.len() as u64,
            api_calls: 0,
            decisions: self.decisions.clone(),
            scan_skew: author_skew(
                self.scanned
                    .iter()
                    .map(|(author, tally)| (author, tally.entries)),
            ),
            authors,
        }
    }
}

fn key_for(code: &str, dataset_aware: bool, record: &EntryRecord) -> BucketKey {
    BucketKey {
        code: code.to_string(),
        author: record.main_author.clone(),
        dataset: if dataset_aware {
            record.primary_dataset().cloned()
        } else {
            None
        },
    }
}

fn sort_key(record: &EntryRecord, dataset_aware: bool) -> (&str, Option<&str>, &str) {
    let dataset = if dataset_aware {
        record.primary_dataset().map(String::as_str)
    } else {
        None
    };
    (record.main_author.as_str(), dataset, record.entry_id.as_str())
}

/// Pure merge reducer: offer `new_records` to `existing` and return the result.
pub fn merge<I>(mut existing: SelectionState, new_records: I) -> SelectionState
where
    I: IntoIterator<Item = EntryRecord>,
{
    existing.admit_all(new_records);
    existing
}

/// True once further pages cannot change which authors or datasets are
/// selected, given a stream ordered by ascending entry id.
///
/// Only representative mode saturates: the author cap is filled and, when
/// dataset-aware, every selected author has its dataset cap filled. Later
/// records then rank behind every selected author and dataset.
pub fn is_saturated(state: &SelectionState, config: &CollectConfig) -> bool {
    if config.mode != SelectionMode::Representative || !config.stop_when_saturated {
        return false;
    }
    let authors = state.selected_authors();
    if authors.len() < config.max_authors_per_code {
        return false;
    }
    !config.dataset_aware
        || authors
            .values()
            .all(|datasets| datasets.len() >= config.max_datasets_per_author)
}

/// Per-dataset entry count for one author.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Dataset id; `None` counts entries without datasets.
    pub dataset_id: Option<DatasetId>,
    /// Entries scanned for this author and dataset.
    pub n_entries: u64,
}

/// Scan and pick counts for one author of a code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorStats {
    /// Normalized main author.
    pub main_author: AuthorId,
    /// Entries scanned for this author.
    pub n_entries: u64,
    /// Entries selected for this author.
    pub n_picked: u64,
    /// Per-dataset scan counts, sorted by dataset id.
    pub datasets: Vec<DatasetStats>,
}

/// Statistics of one finalized code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeStats {
    /// Records offered to the sampler.
    pub entries_scanned: u64,
    /// Entries returned without an id or author.
    pub entries_skipped: u64,
    /// Entries in the final selection, pinned ones included.
    pub entries_picked: u64,
    /// Distinct authors scanned.
    pub authors_scanned: u64,
    /// Distinct authors selected.
    pub authors_picked: u64,
    /// Distinct datasets scanned.
    pub datasets_scanned: u64,
    /// Distinct datasets across selected entries.
    pub datasets_picked: u64,
    /// Entries carried over from the previous selection.
    pub pinned: u64,
    /// Remote calls spent on this code, retries included.
    pub api_calls: u64,
    /// Admission decisions by kind.
    pub decisions: DecisionTally,
    /// Spread of scanned entries across authors.
    pub scan_skew: Option<AuthorSkew>,
    /// Per-author counts, sorted by author.
    pub authors: Vec<AuthorStats>,
}

/// Frozen selection for one code.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeSelection {
    /// Code the selection was made for.
    pub code: CodeName,
    /// Selected entries in output order.
    pub entries: Vec<AdmittedEntry>,
    /// Scan and pick statistics.
    pub stats: CodeStats,
    /// Fewer picks than `min_entries`.
    pub under_filled: bool,
    /// Threshold the selection was checked against.
    pub min_entries: usize,
}

impl CodeSelection {
    /// Output lines for the per-code selection file.
    pub fn picked_entries(&self, query_by: QueryBy) -> Vec<PickedEntry> {
        self.entries
            .iter()
            .map(|entry| {
                PickedEntry::new(
                    entry.record.clone(),
                    entry.provenance,
                    &self.code,
                    query_by,
                )
                .with_bucket_entry_count(entry.bucket_entry_count)
            })
            .collect()
    }
}
