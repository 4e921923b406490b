//! Canonical dependency-set keys and their occurrence counts.
//!
//! - [`DependencySet`] normalizes and orders the identifiers extracted from
//!   one manifest so that equivalent manifests produce the same key.
//! - [`FrequencyTable`] counts keys and reports them most-common first, with
//!   ties resolved by first insertion.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Separator between identifiers in a canonical key.
pub const KEY_SEPARATOR: &str = ", ";

/// The unique dependency identifiers declared by a single manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet(BTreeSet<String>);

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an identifier after trimming and lowercasing it. Blank
    /// identifiers are ignored.
    pub fn insert(&mut self, identifier: &str) {
        let normalized = identifier.trim().to_lowercase();
        if !normalized.is_empty() {
            self.0.insert(normalized);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Sorted identifiers joined with [`KEY_SEPARATOR`], or `None` for an
    /// empty set.
    pub fn key(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(self.iter().collect::<Vec<_>>().join(KEY_SEPARATOR))
    }
}

impl<S: AsRef<str>> FromIterator<S> for DependencySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for identifier in iter {
            set.insert(identifier.as_ref());
        }
        set
    }
}

/// Occurrence counts per canonical dependency-set key.
///
/// Keys live in an insertion-ordered ledger; `index` maps a key to its slot.
/// The ledger order is what makes [`FrequencyTable::most_common`] stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    index: HashMap<String, usize>,
    entries: Vec<(String, u64)>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `set`. Empty sets are not counted.
    pub fn record(&mut self, set: &DependencySet) {
        if let Some(key) = set.key() {
            self.add(key, 1);
        }
    }

    fn add(&mut self, key: String, count: u64) {
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 += count,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, count));
            }
        }
    }

    #[cfg(test)]
    pub fn count(&self, key: &str) -> u64 {
        self.index
            .get(key)
            .map(|&slot| self.entries[slot].1)
            .unwrap_or(0)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts, i.e. the number of manifests recorded.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    /// Entries by descending count; equal counts keep first-insertion order.
    pub fn most_common(&self) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self
            .entries
            .iter()
            .map(|(key, count)| (key.as_str(), *count))
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    /// Additive union: every count in `other` is added to this table.
    pub fn merge(&mut self, other: &FrequencyTable) {
        for (key, count) in other.most_common() {
            self.add(key.to_string(), count);
        }
    }
}

impl Serialize for FrequencyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ranked = self.most_common();
        let mut map = serializer.serialize_map(Some(ranked.len()))?;
        for (key, count) in ranked {
            map.serialize_entry(key, &count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FrequencyTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = FrequencyTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of dependency-set keys to positive counts")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
                let mut table = FrequencyTable::new();
                while let Some((key, count)) = access.next_entry::<String, u64>()? {
                    if count == 0 {
                        return Err(de::Error::custom(format!(
                            "count for `{}` must be at least 1",
                            key
                        )));
                    }
                    table.add(key, count);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}
