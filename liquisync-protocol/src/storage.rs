use std::collections::HashMap;
use std::sync::Mutex;

/// Interface to the durable-store collaborator. Each key is independently
/// addressable and atomically updatable; the protocol core persists Pool,
/// Balance, Escrow Lock and Pending Transaction records through it and makes
/// no further assumptions about the engine behind it.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>);
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn delete(&self, key: &str);
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// In-memory store for simulation and tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn put(&self, key: &str, value: Vec<u8>) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("a"), None);
        store.put("a", vec![1, 2, 3]);
        assert_eq!(store.get("a"), Some(vec![1, 2, 3]));
        store.put("a", vec![4]);
        assert_eq!(store.get("a"), Some(vec![4]));
        store.delete("a");
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn prefix_scan_is_sorted() {
        let store = InMemoryStore::new();
        store.put("pending/b", vec![]);
        store.put("pending/a", vec![]);
        store.put("ack/c", vec![]);
        assert_eq!(
            store.keys_with_prefix("pending/"),
            vec!["pending/a".to_string(), "pending/b".to_string()]
        );
    }
}
