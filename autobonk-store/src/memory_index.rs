// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory local context index.
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::index::ContextIndex;

/// An in-memory context index.
///
/// Cloned instances share the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct MemoryIndex {
    inner: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_index(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.inner
            .read()
            .expect("acquire shared read access on index")
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.inner
            .write()
            .expect("acquire exclusive write access on index")
    }
}

impl ContextIndex for MemoryIndex {
    type Error = Infallible;

    async fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Self::Error> {
        self.write_index().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.read_index().get(key).cloned())
    }

    async fn delete(&mut self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.write_index().remove(key).is_some())
    }

    async fn range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Self::Error> {
        let entries = self
            .read_index()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::index::ContextIndex;

    use super::MemoryIndex;

    #[tokio::test]
    async fn put_get_delete() {
        let mut index = MemoryIndex::new();

        index.put("contexts/a", vec![1]).await.unwrap();
        assert_eq!(index.get("contexts/a").await.unwrap(), Some(vec![1]));

        index.put("contexts/a", vec![2]).await.unwrap();
        assert_eq!(index.get("contexts/a").await.unwrap(), Some(vec![2]));

        assert!(index.delete("contexts/a").await.unwrap());
        assert!(!index.delete("contexts/a").await.unwrap());
        assert_eq!(index.get("contexts/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn range_by_prefix() {
        let mut index = MemoryIndex::new();
        index.put("contexts/b", vec![2]).await.unwrap();
        index.put("other/a", vec![0]).await.unwrap();
        index.put("contexts/a", vec![1]).await.unwrap();
        index.put("contexts", vec![9]).await.unwrap();

        let entries = index.range("contexts/").await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("contexts/a".to_string(), vec![1]),
                ("contexts/b".to_string(), vec![2])
            ]
        );

        // Clones share state.
        let clone = index.clone();
        assert_eq!(clone.range("other/").await.unwrap().len(), 1);
    }
}
