use crate::models::RecordIdentity;
use rustc_hash::FxHashMap;
use serde_json::Value;

/// Pulls the identity out of a raw listing stub: `entity_id` first, the
/// stub's self link otherwise.
pub fn stub_identity(stub: &Value) -> Option<RecordIdentity> {
    if let Some(id) = stub.get("entity_id").and_then(Value::as_str) {
        if !id.is_empty() {
            return Some(RecordIdentity::Entity(id.to_string()));
        }
    }
    stub.pointer("/_links/self/href")
        .and_then(Value::as_str)
        .filter(|href| !href.is_empty())
        .map(|href| RecordIdentity::SelfLink(href.to_string()))
}

/// Last-write-wins index of stubs seen during one enumeration pass.
#[derive(Debug, Default)]
pub struct DedupIndex {
    stubs: FxHashMap<RecordIdentity, Value>,
    raw_count: u64,
    unkeyed: u64,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stub: Value) {
        self.raw_count += 1;
        match stub_identity(&stub) {
            Some(identity) => {
                self.stubs.insert(identity, stub);
            }
            None => self.unkeyed += 1,
        }
    }

    pub fn extend<I: IntoIterator<Item = Value>>(&mut self, stubs: I) {
        for stub in stubs {
            self.insert(stub);
        }
    }

    /// Stubs fed in, duplicates included.
    pub fn raw_count(&self) -> u64 {
        self.raw_count
    }

    pub fn unique_count(&self) -> usize {
        self.stubs.len()
    }

    /// Stubs that carried neither an `entity_id` nor a self link.
    pub fn unkeyed_count(&self) -> u64 {
        self.unkeyed
    }

    pub fn get(&self, identity: &RecordIdentity) -> Option<&Value> {
        self.stubs.get(identity)
    }

    /// Drains the survivors sorted by identity so detail fetching is reproducible.
    pub fn into_sorted(self) -> Vec<(RecordIdentity, Value)> {
        let mut entries: Vec<_> = self.stubs.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
