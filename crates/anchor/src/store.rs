//! Key/value world state backing the anchor contract.

use std::collections::BTreeMap;

/// Persisted key layout.
pub mod keys {
    pub const VERIFYING_KEY: &str = "verifyingKey";
    pub const LATEST_BLOCK: &str = "latestBlockNumber";

    pub fn state_root(block_id: u64) -> String { format!("stateRoot:{block_id}") }
    pub fn proof(block_id: u64) -> String { format!("proof:{block_id}") }
}

pub trait StateStore: Send {
    fn get_state(&self, key: &str) -> Option<Vec<u8>>;
    fn put_state(&mut self, key: &str, value: Vec<u8>);
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.entries.keys().map(String::as_str) }
}

impl StateStore for MemoryStore {
    fn get_state(&self, key: &str) -> Option<Vec<u8>> { self.entries.get(key).cloned() }
    fn put_state(&mut self, key: &str, value: Vec<u8>) { self.entries.insert(key.to_string(), value); }
}
