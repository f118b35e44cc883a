//! Label table mapping label names to instruction indices

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Labels whose name starts with this prefix halt the program when a branch reaches them
/// while they are still unresolved.
pub const HALT_LABEL_PREFIX: char = '.';

const DEFAULT_BUCKETS: usize = 100;

/// Where a label points to
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Target {
    /// Referenced but never bound to an instruction
    Unresolved,
    /// Index of the instruction in the bytecode
    Resolved(usize),
}

#[derive(Debug)]
struct Entry {
    name: String,
    target: Target,
}

/// Hash map with chained buckets. Putting an existing name replaces its target.
#[derive(Debug)]
pub struct LabelTable {
    buckets: Vec<Vec<Entry>>,
    len: usize,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets(buckets: usize) -> Self {
        let buckets = (0..buckets.max(1)).map(|_| Vec::new()).collect();
        LabelTable { buckets, len: 0 }
    }

    pub fn put(&mut self, name: &str, target: Target) {
        let index = self.bucket_of(name);
        let bucket = &mut self.buckets[index];

        match bucket.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.target = target,
            None => {
                bucket.push(Entry {
                    name: name.to_string(),
                    target,
                });
                self.len += 1;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Target> {
        self.buckets[self.bucket_of(name)]
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.target)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every entry, sorted by name so diagnostics are stable
    pub fn iter(&self) -> impl Iterator<Item = (&str, Target)> {
        let mut entries: Vec<_> = self
            .buckets
            .iter()
            .flatten()
            .map(|entry| (entry.name.as_str(), entry.target))
            .collect();
        entries.sort_by(|lhs, rhs| lhs.0.cmp(rhs.0));
        entries.into_iter()
    }

    fn bucket_of(&self, name: &str) -> usize {
        let mut hasher = FxHasher::default();
        name.hash(&mut hasher);
        (hasher.finish() % self.buckets.len() as u64) as usize
    }
}

pub fn is_halt_label(name: &str) -> bool {
    name.starts_with(HALT_LABEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let mut labels = LabelTable::new();
        labels.put("loop", Target::Resolved(3));
        assert_eq!(labels.get("loop"), Some(Target::Resolved(3)));
        assert_eq!(labels.get("missing"), None);
    }

    #[test]
    fn last_writer_wins() {
        let mut labels = LabelTable::new();
        labels.put("later", Target::Unresolved);
        labels.put("later", Target::Resolved(7));
        assert_eq!(labels.get("later"), Some(Target::Resolved(7)));
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn collisions_are_chained() {
        // A single bucket forces every entry into the same chain
        let mut labels = LabelTable::with_buckets(1);
        labels.put("a", Target::Resolved(0));
        labels.put("b", Target::Resolved(1));
        labels.put("c", Target::Unresolved);
        assert_eq!(labels.get("a"), Some(Target::Resolved(0)));
        assert_eq!(labels.get("b"), Some(Target::Resolved(1)));
        assert_eq!(labels.get("c"), Some(Target::Unresolved));
        assert_eq!(
            labels.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn halt_labels() {
        assert!(is_halt_label(".end"));
        assert!(!is_halt_label("end"));
    }
}
