//! Key-set reconciliation: which keys exist on which side.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::error::ReconError;
use crate::schema::KeySpec;
use crate::snapshot::{Key, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Present in source, absent from target.
    Missing,
    /// Present in target, absent from source.
    Extra,
    Matched,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Extra => write!(f, "extra"),
            Self::Matched => write!(f, "matched"),
        }
    }
}

/// Partition of the union of source and target keys. Each set is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeySets {
    pub missing: Vec<Key>,
    pub extra: Vec<Key>,
    pub matched: Vec<Key>,
}

impl KeySets {
    pub fn len(&self) -> usize {
        self.missing.len() + self.extra.len() + self.matched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key seen on either side, in key order.
    pub fn union(&self) -> Vec<Key> {
        let mut all: Vec<Key> = self
            .missing
            .iter()
            .chain(&self.extra)
            .chain(&self.matched)
            .cloned()
            .collect();
        all.sort();
        all
    }

    pub fn status_of(&self, key: &Key) -> Option<KeyStatus> {
        if self.matched.binary_search(key).is_ok() {
            Some(KeyStatus::Matched)
        } else if self.missing.binary_search(key).is_ok() {
            Some(KeyStatus::Missing)
        } else if self.extra.binary_search(key).is_ok() {
            Some(KeyStatus::Extra)
        } else {
            None
        }
    }

    /// (key, status) pairs for every key, in key order.
    pub fn iter_status(&self) -> Vec<(Key, KeyStatus)> {
        let mut out: Vec<(Key, KeyStatus)> = self
            .missing
            .iter()
            .map(|k| (k.clone(), KeyStatus::Missing))
            .chain(self.extra.iter().map(|k| (k.clone(), KeyStatus::Extra)))
            .chain(self.matched.iter().map(|k| (k.clone(), KeyStatus::Matched)))
            .collect();
        out.sort();
        out
    }
}

/// Classify every key in `source ∪ target` as Missing, Extra, or Matched.
pub fn reconcile(source: &HashSet<Key>, target: &HashSet<Key>) -> KeySets {
    let source: BTreeSet<&Key> = source.iter().collect();
    let target: BTreeSet<&Key> = target.iter().collect();

    KeySets {
        missing: source.difference(&target).map(|k| (*k).clone()).collect(),
        extra: target.difference(&source).map(|k| (*k).clone()).collect(),
        matched: source.intersection(&target).map(|k| (*k).clone()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Indexed snapshot pair
// ---------------------------------------------------------------------------

/// Source and target snapshots indexed by the primary key.
#[derive(Debug)]
pub struct IndexedPair<'a> {
    pub source: &'a Snapshot,
    pub target: &'a Snapshot,
    source_rows: HashMap<Key, usize>,
    target_rows: HashMap<Key, usize>,
}

impl<'a> IndexedPair<'a> {
    pub fn new(source: &'a Snapshot, target: &'a Snapshot, key: &KeySpec) -> Result<Self, ReconError> {
        Ok(Self {
            source,
            target,
            source_rows: source.index_by(key)?,
            target_rows: target.index_by(key)?,
        })
    }

    pub fn key_sets(&self) -> KeySets {
        let source: HashSet<Key> = self.source_rows.keys().cloned().collect();
        let target: HashSet<Key> = self.target_rows.keys().cloned().collect();
        reconcile(&source, &target)
    }

    /// Row index on each side, if the key is present there.
    pub fn rows_of(&self, key: &Key) -> (Option<usize>, Option<usize>) {
        (self.source_rows.get(key).copied(), self.target_rows.get(key).copied())
    }
}
