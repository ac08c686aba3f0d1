use serde::{Deserialize, Serialize};

use crate::types::AuthorId;

/// How unevenly entries are spread across authors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorSkew {
    /// Entries counted.
    pub total: u64,
    /// Authors counted.
    pub authors: usize,
    /// Entries of the smallest author.
    pub min: u64,
    /// Entries of the largest author.
    pub max: u64,
    /// Mean entries per author.
    pub mean: f64,
    /// Share of all entries held by the largest author.
    pub max_share: f64,
    /// `max / min`; infinite when some author has no entries.
    pub ratio: f64,
    /// Author holding `max` entries (smallest id on ties).
    pub top_author: AuthorId,
}

/// Compute skew metrics from per-author entry counts.
pub fn author_skew<'a, I>(counts: I) -> Option<AuthorSkew>
where
    I: IntoIterator<Item = (&'a AuthorId, u64)>,
{
    let mut total = 0u64;
    let mut authors = 0usize;
    let mut min = u64::MAX;
    let mut top: Option<(&AuthorId, u64)> = None;
    for (author, count) in counts {
        total += count;
        authors += 1;
        min = min.min(count);
        top = match top {
            Some((best, best_count))
                if best_count > count || (best_count == count && best <= author) =>
            {
                Some((best, best_count))
            }
            _ => Some((author, count)),
        };
    }
    let (top_author, max) = top?;
    let mean = total as f64 / authors as f64;
    let max_share = if total == 0 {
        0.0
    } else {
        max as f64 / total as f64
    };
    let ratio = if min == 0 {
        f64::INFINITY
    } else {
        max as f64 / min as f64
    };
    Some(AuthorSkew {
        total,
        authors,
        min,
        max,
        mean,
        max_share,
        ratio,
        top_author: top_author.clone(),
    })
}
