//! Shared intern table for names produced while loading debug information.
//!
//! Per-entity `name_hash` fields index into this table rather than each
//! entity carrying its own `String`: repeated names (a type used by
//! thousands of variables, a function called from many call sites) are
//! stored once. A fresh cache is produced per `PauseData` snapshot so that
//! snapshots own their strings independently of the `Target` they were
//! computed from.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct StringCache {
    table: HashMap<u64, Arc<str>>,
}

impl StringCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning its hash. Cheap to call repeatedly with the
    /// same string; the underlying `Arc<str>` is only allocated once.
    pub fn intern(&mut self, s: &str) -> u64 {
        let hash = hash_str(s);
        self.table.entry(hash).or_insert_with(|| Arc::from(s));
        hash
    }

    pub fn get(&self, hash: u64) -> Option<&str> {
        self.table.get(&hash).map(|s| s.as_ref())
    }
}

pub fn hash_str(s: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}
