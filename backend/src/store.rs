//! Storage abstraction over a single-table key-value store.
//!
//! Every row is addressed by a partition key (`pk`) and a sort key (`sk`). Rows within a partition
//! are ordered by sort key, and can be queried by sort key prefix.
//!
//! There are no secondary indexes. When an entity needs a second access path, we write a mirror
//! row whose key encodes the lookup attribute, in the same transaction as the authoritative row.
//! See `TxOp` and `KvStore::transact`.
//!
//! Concurrency control is done entirely with conditional writes. A write whose `Condition` does
//! not hold fails with `StoreError::PreconditionFailed`, which callers map to a domain error.

use std::collections::HashMap;

use async_trait::async_trait;
use rusoto_dynamodb::AttributeValue;
use thiserror::Error;

use crate::dynamodb::{av_get_n, av_get_s, av_s};

pub type Item = HashMap<String, AttributeValue>;

pub const PK: &str = "pk";
pub const SK: &str = "sk";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// The key attributes of a row, eg. for `GetItem` or as the base of a new item.
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        let (k, v) = av_s(PK, &self.pk);
        item.insert(k, v);
        let (k, v) = av_s(SK, &self.sk);
        item.insert(k, v);
        item
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self::new(av_get_s(item, PK)?, av_get_s(item, SK)?))
    }
}

/// A single predicate over the current state of a row.
#[derive(Clone, Debug)]
pub enum Clause {
    /// The row exists.
    Exists,
    /// The row does not exist.
    NotExists,
    /// The row does not have the attribute. Also true when the row does not exist.
    AttrNotExists(String),
    /// The row has a number attribute that is at least the given value.
    NumberAtLeast(String, i64),
}

/// A conjunction of clauses. The empty condition always holds.
#[derive(Clone, Debug, Default)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn exists() -> Self {
        Self::none().and(Clause::Exists)
    }

    pub fn not_exists() -> Self {
        Self::none().and(Clause::NotExists)
    }

    pub fn attr_not_exists(name: &str) -> Self {
        Self::none().and(Clause::AttrNotExists(name.to_string()))
    }

    pub fn number_at_least(name: &str, value: i64) -> Self {
        Self::none().and(Clause::NumberAtLeast(name.to_string(), value))
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the condition against the current version of a row, if any.
    pub fn holds(&self, existing: Option<&Item>) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Exists => existing.is_some(),
            Clause::NotExists => existing.is_none(),
            Clause::AttrNotExists(name) => existing.map_or(true, |item| !item.contains_key(name)),
            Clause::NumberAtLeast(name, value) => existing
                .and_then(|item| av_get_n::<i64>(item, name))
                .map_or(false, |n| n >= *value),
        })
    }
}

#[derive(Clone, Debug)]
pub enum UpdateAction {
    Set(String, AttributeValue),
    Remove(String),
    /// Add a delta to a number attribute. A missing attribute counts as zero.
    Increment(String, i64),
}

/// A partial update of a row's attributes. Key attributes cannot be updated.
#[derive(Clone, Debug, Default)]
pub struct Update {
    actions: Vec<UpdateAction>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Set(name.to_string(), value));
        self
    }

    pub fn remove(mut self, name: &str) -> Self {
        self.actions.push(UpdateAction::Remove(name.to_string()));
        self
    }

    pub fn increment(mut self, name: &str, delta: i64) -> Self {
        self.actions
            .push(UpdateAction::Increment(name.to_string(), delta));
        self
    }

    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// One step of an atomic multi-row transaction. `Check` writes nothing; its condition only has
/// to hold for the other steps to apply.
#[derive(Clone, Debug)]
pub enum TxOp {
    Put {
        item: Item,
        condition: Condition,
    },
    Delete {
        key: Key,
        condition: Condition,
    },
    Update {
        key: Key,
        update: Update,
        condition: Condition,
    },
    Check {
        key: Key,
        condition: Condition,
    },
}

impl TxOp {
    pub fn put(item: Item) -> Self {
        TxOp::Put {
            item,
            condition: Condition::none(),
        }
    }

    pub fn put_if(item: Item, condition: Condition) -> Self {
        TxOp::Put { item, condition }
    }

    pub fn delete(key: Key) -> Self {
        TxOp::Delete {
            key,
            condition: Condition::none(),
        }
    }

    pub fn delete_if(key: Key, condition: Condition) -> Self {
        TxOp::Delete { key, condition }
    }

    pub fn update_if(key: Key, update: Update, condition: Condition) -> Self {
        TxOp::Update {
            key,
            update,
            condition,
        }
    }

    pub fn check(key: Key, condition: Condition) -> Self {
        TxOp::Check { key, condition }
    }
}

/// Query one partition, optionally restricted to sort keys with a prefix.
#[derive(Clone, Debug)]
pub struct Query {
    pub pk: String,
    pub sk_prefix: Option<String>,
    pub forward: bool,
    pub limit: Option<usize>,
    /// Exclusive start key, from a previous page's `last_key`.
    pub start_after: Option<Key>,
}

impl Query {
    pub fn new(pk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk_prefix: None,
            forward: true,
            limit: None,
            start_after: None,
        }
    }

    pub fn sk_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sk_prefix = Some(prefix.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.forward = false;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, key: Option<Key>) -> Self {
        self.start_after = key;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Present when the query stopped at its limit. More rows may follow.
    pub last_key: Option<Key>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("precondition failed")]
    PreconditionFailed,

    #[error("store request timed out")]
    Timeout,

    #[error("store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError>;

    /// Write a full row. The item must carry its `pk` and `sk` attributes.
    async fn put(&self, item: Item, condition: Condition) -> Result<(), StoreError>;

    /// Apply a partial update. Like DynamoDB, updating a missing row creates it unless the
    /// condition says otherwise.
    async fn update(&self, key: &Key, update: Update, condition: Condition)
        -> Result<(), StoreError>;

    async fn delete(&self, key: &Key, condition: Condition) -> Result<(), StoreError>;

    /// Apply all writes atomically. If any condition fails, nothing is written and the result is
    /// `StoreError::PreconditionFailed`.
    async fn transact(&self, ops: Vec<TxOp>) -> Result<(), StoreError>;

    async fn query(&self, query: &Query) -> Result<QueryPage, StoreError>;

    /// Fetch many rows at once. Missing rows are omitted. No order is guaranteed.
    async fn batch_get(&self, keys: &[Key]) -> Result<Vec<Item>, StoreError>;

    /// Follow `last_key` until the query is exhausted.
    async fn query_all(&self, query: &Query) -> Result<Vec<Item>, StoreError> {
        let mut query = query.clone();
        let mut items = Vec::new();
        loop {
            let page = self.query(&query).await?;
            items.extend(page.items);
            match page.last_key {
                Some(last_key) => query.start_after = Some(last_key),
                None => return Ok(items),
            }
        }
    }
}
