//! The materialized decision cache.
//!
//! A two-level sparse map from caller uid to target uid to the filter
//! verdict for that pair. The cache is absent until the system becomes
//! ready and is thereafter the source of truth for every query; a missing
//! row or entry for a known caller is a hard miss answered conservatively
//! by the filter (deny visibility). Both levels are sparse because the
//! uid encoding leaves holes; dense arrays indexed by uid would mostly
//! hold nothing.

use std::collections::HashMap;

use appvis_core::ident::{AppId, Uid};

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// The pair is cached; the value is the filter verdict.
    Hit(bool),
    /// No row exists for the caller uid.
    MissingRow,
    /// The caller row exists but has no entry for the target uid.
    MissingEntry,
}

/// Caller-uid -> target-uid -> filtered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionCache {
    rows: HashMap<Uid, HashMap<Uid, bool>>,
}

impl DecisionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the verdict for a caller/target pair.
    #[must_use]
    pub fn lookup(&self, caller: Uid, target: Uid) -> CacheLookup {
        match self.rows.get(&caller) {
            None => CacheLookup::MissingRow,
            Some(targets) => match targets.get(&target) {
                None => CacheLookup::MissingEntry,
                Some(&filtered) => CacheLookup::Hit(filtered),
            },
        }
    }

    /// Records the verdict for a caller/target pair.
    pub fn insert(&mut self, caller: Uid, target: Uid, filtered: bool) {
        self.rows.entry(caller).or_default().insert(target, filtered);
    }

    /// Removes every row keyed by a uid of the departing app id and every
    /// inner entry targeting one.
    pub fn remove_app_id(&mut self, app_id: AppId) {
        self.rows.retain(|caller, targets| {
            if caller.app_id() == app_id {
                return false;
            }
            targets.retain(|target, _| target.app_id() != app_id);
            true
        });
    }

    /// Number of caller rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
