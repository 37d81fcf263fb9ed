use papaya::HashMap as PapayaMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::resource::ReferenceTarget;

/// A `(resourceType, id)` pair discovered while checking another resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DelayedReference {
    pub resource_type: String,
    pub resource_id: String,
}

impl DelayedReference {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for DelayedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// Session-scoped set of references for delayed checks.
///
/// Lock-free and append-only: `record` never overwrites, so concurrent writers
/// recording the same pair leave exactly one entry. Cleared only between runs.
#[derive(Default)]
pub struct DelayedReferenceCache {
    entries: PapayaMap<DelayedReference, ()>,
}

impl DelayedReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pair. Returns `true` when it was not already present.
    pub fn record(&self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> bool {
        let guard = self.entries.pin();
        guard
            .try_insert(DelayedReference::new(resource_type, resource_id), ())
            .is_ok()
    }

    /// Record the target of a literal reference (`Type/id` or absolute URL).
    /// Contained and unparseable references are ignored.
    pub fn record_reference(&self, literal: &str) -> bool {
        match ReferenceTarget::parse(literal) {
            Some(target) => self.record(target.resource_type, target.id),
            None => false,
        }
    }

    /// Ids recorded for `resource_type`. An empty set means "no eligible
    /// resource" and callers should skip, not fail.
    pub fn all(&self, resource_type: &str) -> BTreeSet<String> {
        let guard = self.entries.pin();
        guard
            .iter()
            .filter(|(reference, _)| reference.resource_type == resource_type)
            .map(|(reference, _)| reference.resource_id.clone())
            .collect()
    }

    pub fn contains(&self, resource_type: &str, resource_id: &str) -> bool {
        let guard = self.entries.pin();
        guard.contains_key(&DelayedReference::new(resource_type, resource_id))
    }

    pub fn snapshot(&self) -> BTreeSet<DelayedReference> {
        let guard = self.entries.pin();
        guard.iter().map(|(reference, _)| reference.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything. Call only at the start of a run.
    pub fn clear(&self) {
        self.entries.pin().clear();
    }
}

impl fmt::Debug for DelayedReferenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedReferenceCache")
            .field("len", &self.len())
            .finish()
    }
}
