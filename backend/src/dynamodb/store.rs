//! `KvStore` backed by a single DynamoDB table.
//!
//! Conditions and updates are rendered into DynamoDB expressions with generated placeholder names
//! (`#n0`, `:v1`, ...), so attribute names never collide with reserved words.
//!
//! Every call carries a deadline. If DynamoDB does not answer in time, the call fails with
//! `StoreError::Timeout` and the in-flight request future is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusoto_core::RusotoError;
use rusoto_dynamodb::{
    AttributeValue, BatchGetItemInput, ConditionCheck, Delete, DeleteItemError, DeleteItemInput,
    DynamoDb, DynamoDbClient, GetItemInput, KeysAndAttributes, Put, PutItemError, PutItemInput,
    QueryInput, TransactWriteItem, TransactWriteItemsError, TransactWriteItemsInput,
    UpdateItemError, UpdateItemInput,
};

use crate::dynamodb::{n_val, s_val};
use crate::store::{
    Clause, Condition, Item, Key, KvStore, Query, QueryPage, StoreError, TxOp, Update,
    UpdateAction, PK, SK,
};

/// DynamoDB accepts at most 100 keys per `BatchGetItem`.
const BATCH_GET_MAX_KEYS: usize = 100;

const BATCH_GET_MAX_ATTEMPTS: u32 = 5;

pub struct DynamoStore {
    dynamodb_client: Arc<DynamoDbClient>,
    table_name: String,
    timeout: Duration,
}

impl DynamoStore {
    pub fn new(dynamodb_client: Arc<DynamoDbClient>, table_name: String, timeout: Duration) -> Self {
        Self {
            dynamodb_client,
            table_name,
            timeout,
        }
    }

    async fn deadline<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)
    }

    fn put_input(&self, item: Item, condition: &Condition) -> Put {
        let mut expr = Expression::default();
        let condition_expression = expr.condition(condition);
        Put {
            table_name: self.table_name.clone(),
            item,
            condition_expression,
            expression_attribute_names: expr.names(),
            expression_attribute_values: expr.values(),
            ..Default::default()
        }
    }

    fn delete_input(&self, key: &Key, condition: &Condition) -> Delete {
        let mut expr = Expression::default();
        let condition_expression = expr.condition(condition);
        Delete {
            table_name: self.table_name.clone(),
            key: key.to_item(),
            condition_expression,
            expression_attribute_names: expr.names(),
            expression_attribute_values: expr.values(),
            ..Default::default()
        }
    }

    fn condition_check(&self, key: &Key, condition: &Condition) -> ConditionCheck {
        let mut expr = Expression::default();
        let condition_expression = expr.condition(condition).unwrap_or_default();
        ConditionCheck {
            table_name: self.table_name.clone(),
            key: key.to_item(),
            condition_expression,
            expression_attribute_names: expr.names(),
            expression_attribute_values: expr.values(),
            ..Default::default()
        }
    }

    fn update_input(
        &self,
        key: &Key,
        update: &Update,
        condition: &Condition,
    ) -> rusoto_dynamodb::Update {
        let mut expr = Expression::default();
        let update_expression = expr.update(update);
        let condition_expression = expr.condition(condition);
        rusoto_dynamodb::Update {
            table_name: self.table_name.clone(),
            key: key.to_item(),
            update_expression,
            condition_expression,
            expression_attribute_names: expr.names(),
            expression_attribute_values: expr.values(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl KvStore for DynamoStore {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        let input = GetItemInput {
            table_name: self.table_name.clone(),
            key: key.to_item(),
            consistent_read: Some(true),
            ..Default::default()
        };
        let output = self
            .deadline(self.dynamodb_client.get_item(input))
            .await?
            .map_err(backend_error)?;
        Ok(output.item)
    }

    async fn put(&self, item: Item, condition: Condition) -> Result<(), StoreError> {
        let put = self.put_input(item, &condition);
        let input = PutItemInput {
            table_name: put.table_name,
            item: put.item,
            condition_expression: put.condition_expression,
            expression_attribute_names: put.expression_attribute_names,
            expression_attribute_values: put.expression_attribute_values,
            ..Default::default()
        };
        match self.deadline(self.dynamodb_client.put_item(input)).await? {
            Ok(_) => Ok(()),
            Err(RusotoError::Service(PutItemError::ConditionalCheckFailed(_))) => {
                Err(StoreError::PreconditionFailed)
            }
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn update(
        &self,
        key: &Key,
        update: Update,
        condition: Condition,
    ) -> Result<(), StoreError> {
        let u = self.update_input(key, &update, &condition);
        let input = UpdateItemInput {
            table_name: u.table_name,
            key: u.key,
            update_expression: Some(u.update_expression),
            condition_expression: u.condition_expression,
            expression_attribute_names: u.expression_attribute_names,
            expression_attribute_values: u.expression_attribute_values,
            ..Default::default()
        };
        match self.deadline(self.dynamodb_client.update_item(input)).await? {
            Ok(_) => Ok(()),
            Err(RusotoError::Service(UpdateItemError::ConditionalCheckFailed(_))) => {
                Err(StoreError::PreconditionFailed)
            }
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn delete(&self, key: &Key, condition: Condition) -> Result<(), StoreError> {
        let d = self.delete_input(key, &condition);
        let input = DeleteItemInput {
            table_name: d.table_name,
            key: d.key,
            condition_expression: d.condition_expression,
            expression_attribute_names: d.expression_attribute_names,
            expression_attribute_values: d.expression_attribute_values,
            ..Default::default()
        };
        match self.deadline(self.dynamodb_client.delete_item(input)).await? {
            Ok(_) => Ok(()),
            Err(RusotoError::Service(DeleteItemError::ConditionalCheckFailed(_))) => {
                Err(StoreError::PreconditionFailed)
            }
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn transact(&self, ops: Vec<TxOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let transact_items = ops
            .into_iter()
            .map(|op| match op {
                TxOp::Put { item, condition } => TransactWriteItem {
                    put: Some(self.put_input(item, &condition)),
                    ..Default::default()
                },
                TxOp::Delete { key, condition } => TransactWriteItem {
                    delete: Some(self.delete_input(&key, &condition)),
                    ..Default::default()
                },
                TxOp::Update {
                    key,
                    update,
                    condition,
                } => TransactWriteItem {
                    update: Some(self.update_input(&key, &update, &condition)),
                    ..Default::default()
                },
                TxOp::Check { key, condition } => TransactWriteItem {
                    condition_check: Some(self.condition_check(&key, &condition)),
                    ..Default::default()
                },
            })
            .collect();
        let input = TransactWriteItemsInput {
            transact_items,
            ..Default::default()
        };
        match self
            .deadline(self.dynamodb_client.transact_write_items(input))
            .await?
        {
            Ok(_) => Ok(()),
            // The cancellation reasons are only reported in the message, eg.
            // "Transaction cancelled, please refer cancellation reasons for specific reasons
            // [None, ConditionalCheckFailed]".
            Err(RusotoError::Service(TransactWriteItemsError::TransactionCanceled(message)))
                if message.contains("ConditionalCheckFailed") =>
            {
                Err(StoreError::PreconditionFailed)
            }
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn query(&self, query: &Query) -> Result<QueryPage, StoreError> {
        let mut expr = Expression::default();
        let pk_name = expr.name(PK);
        let pk_value = expr.value(s_val(&query.pk));
        let mut key_condition_expression = format!("{} = {}", pk_name, pk_value);
        if let Some(prefix) = query.sk_prefix.as_ref() {
            let sk_name = expr.name(SK);
            let prefix_value = expr.value(s_val(prefix));
            key_condition_expression.push_str(&format!(
                " AND begins_with({}, {})",
                sk_name, prefix_value
            ));
        }
        let input = QueryInput {
            table_name: self.table_name.clone(),
            key_condition_expression: Some(key_condition_expression),
            expression_attribute_names: expr.names(),
            expression_attribute_values: expr.values(),
            scan_index_forward: Some(query.forward),
            limit: query.limit.map(|limit| limit as i64),
            exclusive_start_key: query.start_after.as_ref().map(Key::to_item),
            consistent_read: Some(true),
            ..Default::default()
        };
        let output = self
            .deadline(self.dynamodb_client.query(input))
            .await?
            .map_err(backend_error)?;
        Ok(QueryPage {
            items: output.items.unwrap_or_default(),
            last_key: output
                .last_evaluated_key
                .as_ref()
                .and_then(Key::from_item),
        })
    }

    async fn batch_get(&self, keys: &[Key]) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::with_capacity(keys.len());
        // DynamoDB rejects duplicate keys inside one request.
        let mut unique_keys: Vec<&Key> = keys.iter().collect();
        unique_keys.sort();
        unique_keys.dedup();

        for chunk in unique_keys.chunks(BATCH_GET_MAX_KEYS) {
            let mut pending: Vec<Item> = chunk.iter().map(|key| key.to_item()).collect();
            let mut attempt = 0;
            while !pending.is_empty() {
                attempt += 1;
                if attempt > BATCH_GET_MAX_ATTEMPTS {
                    return Err(StoreError::Backend(format!(
                        "batch get left {} keys unprocessed",
                        pending.len()
                    )));
                }
                if attempt > 1 {
                    tokio::time::delay_for(Duration::from_millis(50 * attempt as u64)).await;
                }
                let mut request_items = HashMap::new();
                request_items.insert(
                    self.table_name.clone(),
                    KeysAndAttributes {
                        keys: std::mem::take(&mut pending),
                        consistent_read: Some(true),
                        ..Default::default()
                    },
                );
                let input = BatchGetItemInput {
                    request_items,
                    ..Default::default()
                };
                let output = self
                    .deadline(self.dynamodb_client.batch_get_item(input))
                    .await?
                    .map_err(backend_error)?;
                if let Some(mut responses) = output.responses {
                    if let Some(found) = responses.remove(&self.table_name) {
                        items.extend(found);
                    }
                }
                if let Some(mut unprocessed) = output.unprocessed_keys {
                    if let Some(rest) = unprocessed.remove(&self.table_name) {
                        pending = rest.keys;
                    }
                }
            }
        }
        Ok(items)
    }
}

fn backend_error<E: std::error::Error + 'static>(e: RusotoError<E>) -> StoreError {
    log::error!("DynamoDB error: {}", e);
    StoreError::Backend(e.to_string())
}

/// Collects placeholder names and values while rendering expressions.
#[derive(Default)]
struct Expression {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    next: usize,
}

impl Expression {
    fn name(&mut self, name: &str) -> String {
        let placeholder = format!("#n{}", self.next);
        self.next += 1;
        self.names.insert(placeholder.clone(), name.to_string());
        placeholder
    }

    fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.next);
        self.next += 1;
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    fn condition(&mut self, condition: &Condition) -> Option<String> {
        if condition.is_empty() {
            return None;
        }
        let parts: Vec<String> = condition
            .clauses()
            .iter()
            .map(|clause| match clause {
                Clause::Exists => format!("attribute_exists({})", self.name(PK)),
                Clause::NotExists => format!("attribute_not_exists({})", self.name(PK)),
                Clause::AttrNotExists(attr) => {
                    format!("attribute_not_exists({})", self.name(attr))
                }
                Clause::NumberAtLeast(attr, at_least) => {
                    let name = self.name(attr);
                    let value = self.value(n_val(at_least));
                    format!("{} >= {}", name, value)
                }
            })
            .collect();
        Some(parts.join(" AND "))
    }

    fn update(&mut self, update: &Update) -> String {
        let mut set_parts = Vec::new();
        let mut remove_parts = Vec::new();
        for action in update.actions() {
            match action {
                UpdateAction::Set(attr, value) => {
                    let name = self.name(attr);
                    let value = self.value(value.clone());
                    set_parts.push(format!("{} = {}", name, value));
                }
                UpdateAction::Increment(attr, delta) => {
                    let name = self.name(attr);
                    let zero = self.value(n_val(0));
                    let delta = self.value(n_val(delta));
                    set_parts.push(format!(
                        "{} = if_not_exists({}, {}) + {}",
                        name, name, zero, delta
                    ));
                }
                UpdateAction::Remove(attr) => {
                    remove_parts.push(self.name(attr));
                }
            }
        }
        let mut expression = String::new();
        if !set_parts.is_empty() {
            expression.push_str("SET ");
            expression.push_str(&set_parts.join(", "));
        }
        if !remove_parts.is_empty() {
            if !expression.is_empty() {
                expression.push(' ');
            }
            expression.push_str("REMOVE ");
            expression.push_str(&remove_parts.join(", "));
        }
        expression
    }

    fn names(&self) -> Option<HashMap<String, String>> {
        if self.names.is_empty() {
            None
        } else {
            Some(self.names.clone())
        }
    }

    fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.clone())
        }
    }
}
