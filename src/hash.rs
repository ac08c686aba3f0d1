//! Seeded, platform-independent hashing used to break ties between candidates.
//!
//! The pick key is the SHA-256 digest of `"{seed}:{entry_id}"`, compared as a
//! big-endian number; the smallest digest wins. Changing either the input
//! layout or the comparison direction changes which entries get picked, so
//! both are fixed here.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::constants::sampler::PICK_KEY_SEPARATOR;

/// Orderable digest of a (seed, entry id) pair. Smaller keys win.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PickKey([u8; 32]);

impl PickKey {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PickKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("..")
    }
}

fn stable_digest_with(f: impl FnOnce(&mut Sha256)) -> [u8; 32] {
    let mut hasher = Sha256::new();
    f(&mut hasher);
    hasher.finalize().into()
}

/// Pick key for `entry_id` under `seed`. Pure; no process or platform state.
pub fn stable_pick_key(seed: u64, entry_id: &str) -> PickKey {
    PickKey(stable_digest_with(|hasher| {
        hasher.update(seed.to_string().as_bytes());
        hasher.update(PICK_KEY_SEPARATOR.as_bytes());
        hasher.update(entry_id.as_bytes());
    }))
}

/// Return the candidate with the smallest pick key, ignoring candidate order.
///
/// Candidates with an empty id are skipped. Equal ids resolve to the first
/// occurrence.
pub fn stable_pick<'a, T, I, F>(candidates: I, seed: u64, entry_id: F) -> Option<&'a T>
where
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> &str,
{
    let mut best: Option<(PickKey, &'a T)> = None;
    for candidate in candidates {
        let id = entry_id(candidate);
        if id.is_empty() {
            continue;
        }
        let key = stable_pick_key(seed, id);
        match &best {
            Some((best_key, _)) if *best_key <= key => {}
            _ => best = Some((key, candidate)),
        }
    }
    best.map(|(_, candidate)| candidate)
}
