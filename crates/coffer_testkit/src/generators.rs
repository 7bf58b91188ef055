//! Property-based generators for the universal provider invariants
//! (see `coffer_provider::StorageProvider`'s contract).

use proptest::prelude::*;

/// Strategy for generating plausible entity keys: non-empty, printable,
/// free of interior NUL bytes so every backend (including the file-per-record
/// and hierarchical variants, which derive filesystem paths or hashes from
/// the key) can store it without reinterpreting it.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_\\-:./]{1,64}").expect("valid key regex")
}

/// Strategy for generating arbitrary entity payload bytes.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

/// One operation in a generated sequence exercised against a provider.
#[derive(Debug, Clone)]
pub enum KvOperation {
    /// `save(key, value)`.
    Save(String, Vec<u8>),
    /// `delete(key)`.
    Delete(String),
    /// `get(key)`, checked against a parallel reference model rather than
    /// asserted against any fixed expectation here.
    Get(String),
}

/// Strategy for a single [`KvOperation`] drawn against a small, shared key
/// space so that save/delete/get sequences actually exercise overwrites
/// and not-found paths instead of almost always missing each other.
pub fn kv_operation_strategy() -> impl Strategy<Value = KvOperation> {
    let shared_keys = prop::string::string_regex("key-[0-9]{1,2}").expect("valid key regex");
    prop_oneof![
        (shared_keys.clone(), value_strategy()).prop_map(|(k, v)| KvOperation::Save(k, v)),
        shared_keys.clone().prop_map(KvOperation::Delete),
        shared_keys.prop_map(KvOperation::Get),
    ]
}

/// Strategy for a bounded sequence of [`KvOperation`]s.
pub fn kv_operation_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<KvOperation>> {
    prop::collection::vec(kv_operation_strategy(), 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::test_runner::{Config, TestRunner};

    #[test]
    fn key_strategy_never_produces_empty_keys() {
        let mut runner = TestRunner::new(Config::default());
        let strategy = key_strategy();
        for _ in 0..256 {
            let tree = strategy.new_tree(&mut runner).unwrap();
            assert!(!tree.current().is_empty());
        }
    }
}
