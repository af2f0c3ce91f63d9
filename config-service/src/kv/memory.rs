use super::{KvClient, KvError, KvPair};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Process-local backend with the same semantics as the Consul one. Listing
/// order is lexicographic by key.
#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        self.data.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> Result<bool, KvError> {
        match self.data.write().entry(key.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, KvError> {
        let read_guard = self.data.read();
        let pairs = read_guard
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KvPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        Ok(pairs)
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), KvError> {
        self.data.write().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_point_operations() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("a/b").await.unwrap(), None);

        kv.put("a/b", Bytes::from("1")).await.unwrap();
        assert_eq!(kv.get("a/b").await.unwrap(), Some(Bytes::from("1")));

        kv.put("a/b", Bytes::from("2")).await.unwrap();
        assert_eq!(kv.get("a/b").await.unwrap(), Some(Bytes::from("2")));

        kv.delete("a/b").await.unwrap();
        assert_eq!(kv.get("a/b").await.unwrap(), None);

        // Missing key
        kv.delete("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let kv = MemoryKv::new();
        assert!(kv.put_if_absent("k", Bytes::new()).await.unwrap());
        assert!(!kv.put_if_absent("k", Bytes::from("x")).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_list_and_delete_tree() {
        let kv = MemoryKv::new();
        for key in ["g/1/a", "g/1/b", "g/10/c", "g/2/d", "h/1/e"] {
            kv.put(key, Bytes::from(key)).await.unwrap();
        }

        let keys: Vec<String> = kv
            .list("g/1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec!["g/1/a", "g/1/b", "g/10/c"]);

        let pairs = kv.list("g/1/").await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].value, Bytes::from("g/1/a"));

        kv.delete_tree("g/1/").await.unwrap();
        assert!(kv.list("g/1/").await.unwrap().is_empty());
        assert_eq!(kv.len(), 3);

        assert!(kv.list("missing/").await.unwrap().is_empty());
    }
}
