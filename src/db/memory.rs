use super::{RecordResult, RecordStore, RecordStoreError};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-memory record store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryRecordStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &str) -> RecordResult<Option<String>> {
        let map = self.entries.read().map_err(|_| RecordStoreError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> RecordResult<()> {
        let mut map = self.entries.write().map_err(|_| RecordStoreError::Poisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> RecordResult<()> {
        let mut map = self.entries.write().map_err(|_| RecordStoreError::Poisoned)?;
        map.remove(key);
        Ok(())
    }

    fn list_by_prefix(&self, prefix: &str) -> RecordResult<Vec<(String, String)>> {
        let map = self.entries.read().map_err(|_| RecordStoreError::Poisoned)?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl std::fmt::Debug for MemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecordStore")
            .field("record_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_none() {
        let store = MemoryRecordStore::new();
        assert!(store.get("nope").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn overwrite_keeps_one_entry() {
        let store = MemoryRecordStore::new();
        store.put("k", "1").unwrap();
        store.put("k", "2").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn list_and_remove_by_prefix() {
        let store = MemoryRecordStore::new();
        store.put("p/a", "1").unwrap();
        store.put("p/b", "2").unwrap();
        store.put("q/a", "3").unwrap();

        let keys: Vec<String> = store
            .list_by_prefix("p/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["p/a", "p/b"]);

        assert_eq!(store.remove_by_prefix("p/").unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_writers_do_not_tear_records() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryRecordStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.put("shared", &format!("value-{i}")).unwrap();
                        let v = store.get("shared").unwrap().unwrap();
                        assert!(v.starts_with("value-"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(store.len(), 1);
    }
}
