use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dynamodb::{av_get_n, n_val};
use crate::store::{
    Condition, Item, Key, KvStore, Query, QueryPage, StoreError, TxOp, Update, UpdateAction,
};

/// In-process `KvStore` with the same conditional and transactional semantics as `DynamoStore`.
/// Rows are kept ordered by (pk, sk), like a DynamoDB partition.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<(String, String), Item>>,
    failing_put_prefix: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.rows
            .lock()
            .unwrap()
            .contains_key(&(key.pk.clone(), key.sk.clone()))
    }

    /// Fail every put of a row whose partition key starts with `pk_prefix`, as if the table were
    /// throttled. Deletes and updates still succeed.
    pub fn fail_puts_under(&self, pk_prefix: &str) {
        *self.failing_put_prefix.lock().unwrap() = Some(pk_prefix.to_string());
    }

    fn check_put(&self, key: &Key) -> Result<(), StoreError> {
        match self.failing_put_prefix.lock().unwrap().as_deref() {
            Some(prefix) if key.pk.starts_with(prefix) => Err(StoreError::Backend(
                "ProvisionedThroughputExceededException".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn row_key(key: &Key) -> (String, String) {
    (key.pk.clone(), key.sk.clone())
}

fn item_key(item: &Item) -> Result<Key, StoreError> {
    Key::from_item(item).ok_or_else(|| StoreError::Backend("item is missing pk or sk".to_string()))
}

fn apply_update(existing: Option<&Item>, key: &Key, update: &Update) -> Item {
    let mut item = existing.cloned().unwrap_or_else(|| key.to_item());
    for action in update.actions() {
        match action {
            UpdateAction::Set(name, value) => {
                item.insert(name.clone(), value.clone());
            }
            UpdateAction::Remove(name) => {
                item.remove(name);
            }
            UpdateAction::Increment(name, delta) => {
                let current = av_get_n::<i64>(&item, name).unwrap_or(0);
                item.insert(name.clone(), n_val(current + delta));
            }
        }
    }
    item
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        Ok(self.rows.lock().unwrap().get(&row_key(key)).cloned())
    }

    async fn put(&self, item: Item, condition: Condition) -> Result<(), StoreError> {
        let key = item_key(&item)?;
        self.check_put(&key)?;
        let mut rows = self.rows.lock().unwrap();
        if !condition.holds(rows.get(&row_key(&key))) {
            return Err(StoreError::PreconditionFailed);
        }
        rows.insert(row_key(&key), item);
        Ok(())
    }

    async fn update(
        &self,
        key: &Key,
        update: Update,
        condition: Condition,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows.get(&row_key(key));
        if !condition.holds(existing) {
            return Err(StoreError::PreconditionFailed);
        }
        let updated = apply_update(existing, key, &update);
        rows.insert(row_key(key), updated);
        Ok(())
    }

    async fn delete(&self, key: &Key, condition: Condition) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if !condition.holds(rows.get(&row_key(key))) {
            return Err(StoreError::PreconditionFailed);
        }
        rows.remove(&row_key(key));
        Ok(())
    }

    async fn transact(&self, ops: Vec<TxOp>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for op in ops.iter() {
            let (key, condition) = match op {
                TxOp::Put { item, condition } => {
                    let key = item_key(item)?;
                    self.check_put(&key)?;
                    (key, condition)
                }
                TxOp::Delete { key, condition } => (key.clone(), condition),
                TxOp::Update { key, condition, .. } => (key.clone(), condition),
                TxOp::Check { key, condition } => (key.clone(), condition),
            };
            if !condition.holds(rows.get(&row_key(&key))) {
                return Err(StoreError::PreconditionFailed);
            }
        }
        for op in ops.into_iter() {
            match op {
                TxOp::Put { item, .. } => {
                    let key = item_key(&item)?;
                    rows.insert(row_key(&key), item);
                }
                TxOp::Delete { key, .. } => {
                    rows.remove(&row_key(&key));
                }
                TxOp::Update { key, update, .. } => {
                    let updated = apply_update(rows.get(&row_key(&key)), &key, &update);
                    rows.insert(row_key(&key), updated);
                }
                TxOp::Check { .. } => {}
            }
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<QueryPage, StoreError> {
        let rows = self.rows.lock().unwrap();
        let prefix = query.sk_prefix.clone().unwrap_or_default();
        let mut matching: Vec<(&(String, String), &Item)> = rows
            .iter()
            .filter(|((pk, sk), _)| pk == &query.pk && sk.starts_with(&prefix))
            .collect();
        if !query.forward {
            matching.reverse();
        }
        if let Some(start_after) = query.start_after.as_ref() {
            matching.retain(|((_, sk), _)| {
                if query.forward {
                    sk > &start_after.sk
                } else {
                    sk < &start_after.sk
                }
            });
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        let has_more = matching.len() > limit;
        let items: Vec<Item> = matching
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect();
        let last_key = if has_more {
            items.last().and_then(Key::from_item)
        } else {
            None
        };
        Ok(QueryPage { items, last_key })
    }

    async fn batch_get(&self, keys: &[Key]) -> Result<Vec<Item>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| rows.get(&row_key(key)).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::dynamodb::{av_get_s, av_map, av_s};

    fn row(pk: &str, sk: &str) -> Item {
        let mut item = Key::new(pk, sk).to_item();
        item.extend(av_map(&[av_s("v", sk)]));
        item
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.put(row("a", "1"), Condition::none()).await.unwrap();
        let result = store
            .transact(vec![
                TxOp::put(row("a", "2")),
                TxOp::put_if(row("a", "1"), Condition::not_exists()),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::PreconditionFailed)));
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&Key::new("a", "2")));
    }

    #[tokio::test]
    async fn test_query_pages() {
        let store = MemoryStore::new();
        for sk in &["POST#a", "POST#b", "POST#c", "MEMBER#x"] {
            store.put(row("p", sk), Condition::none()).await.unwrap();
        }
        store.put(row("q", "POST#z"), Condition::none()).await.unwrap();

        let query = Query::new("p").sk_prefix("POST#").descending().limit(2);
        let page = store.query(&query).await.unwrap();
        let sks: Vec<&str> = page.items.iter().filter_map(|i| av_get_s(i, "sk")).collect();
        assert_eq!(sks, vec!["POST#c", "POST#b"]);
        assert_eq!(page.last_key, Some(Key::new("p", "POST#b")));

        let page = store
            .query(&query.clone().start_after(page.last_key))
            .await
            .unwrap();
        let sks: Vec<&str> = page.items.iter().filter_map(|i| av_get_s(i, "sk")).collect();
        assert_eq!(sks, vec!["POST#a"]);
        assert_eq!(page.last_key, None);

        let all = store.query_all(&Query::new("p").limit(1)).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_increment_missing_attribute() {
        let store = MemoryStore::new();
        let key = Key::new("ARTISTS#abcd", "ARTIST");
        store.put(key.to_item(), Condition::none()).await.unwrap();
        store
            .update(&key, Update::new().increment("follower_count", 1), Condition::exists())
            .await
            .unwrap();
        let item = store.get(&key).await.unwrap().unwrap();
        assert_eq!(av_get_n::<i64>(&item, "follower_count"), Some(1));
    }
}
