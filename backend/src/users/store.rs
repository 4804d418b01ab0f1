//! User rows. There is no secondary index, so each lookup path has its own row, written in the
//! same transaction as the user.
//!
//! ```text
//! USERS#user,<first char of id>       / USER#<id>          the user
//! USERS#email#<sha256(email)[..2]>    / <email>            user_id
//! USERS#cognito_sub#<sub[..2]>        / <sub>              user_id
//! USERS#user,<first char of id>       / LINKED_SUB#<sub>   one per linked identity
//! ```
//!
//! Lookup partitions are sharded by a short prefix so that no single partition holds every user.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::dynamodb::{av_map, av_s, av_string};
use crate::store::{Condition, Item, Key, KvStore, Query, StoreError, TxOp};

const LINKED_SUB_PREFIX: &str = "LINKED_SUB#";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cognito_sub: String,
    pub created_at: String,
}

/// Lowercase and trim an email address. No other validation is done here; the identity provider
/// rejects malformed addresses.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn user_pk(user_id: &str) -> String {
    let shard: String = user_id.chars().take(1).collect();
    format!("USERS#user,{}", shard)
}

fn user_key(user_id: &str) -> Key {
    Key::new(user_pk(user_id), format!("USER#{}", user_id))
}

fn email_key(email: &str) -> Key {
    let digest = hex::encode(Sha256::digest(email.as_bytes()));
    Key::new(format!("USERS#email#{}", &digest[..2]), email)
}

fn sub_key(sub: &str) -> Key {
    let shard: String = sub.chars().take(2).collect();
    Key::new(format!("USERS#cognito_sub#{}", shard), sub)
}

fn linked_sub_key(user_id: &str, sub: &str) -> Key {
    Key::new(user_pk(user_id), format!("{}{}", LINKED_SUB_PREFIX, sub))
}

fn lookup_item(key: Key, user_id: &str) -> Item {
    let mut item = key.to_item();
    item.extend(av_map(&[av_s("user_id", user_id)]));
    item
}

fn item_to_user(item: &Item) -> User {
    User {
        id: av_string(item, "id"),
        email: av_string(item, "email"),
        cognito_sub: av_string(item, "cognito_sub"),
        created_at: av_string(item, "created_at"),
    }
}

pub struct UserStore {
    store: Arc<dyn KvStore>,
}

impl UserStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        if user_id.is_empty() {
            return Ok(None);
        }
        let item = self.store.get(&user_key(user_id)).await?;
        Ok(item.as_ref().map(item_to_user))
    }

    /// Id of the user registered with `email`, which must already be normalized.
    pub async fn get_id_by_email(&self, email: &str) -> Result<Option<String>, StoreError> {
        if email.is_empty() {
            return Ok(None);
        }
        let item = self.store.get(&email_key(email)).await?;
        Ok(item.map(|item| av_string(&item, "user_id")))
    }

    /// Id of the user a subject belongs to, as primary or linked identity.
    pub async fn get_id_by_sub(&self, sub: &str) -> Result<Option<String>, StoreError> {
        if sub.is_empty() {
            return Ok(None);
        }
        let item = self.store.get(&sub_key(sub)).await?;
        Ok(item.map(|item| av_string(&item, "user_id")))
    }

    /// Write the user and its lookup rows. Fails with `StoreError::PreconditionFailed` if the id,
    /// email or subject is already taken.
    pub async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        let mut main = user_key(&user.id).to_item();
        main.extend(av_map(&[
            av_s("id", &user.id),
            av_s("email", &user.email),
            av_s("created_at", &user.created_at),
        ]));
        if !user.cognito_sub.is_empty() {
            main.extend(av_map(&[av_s("cognito_sub", &user.cognito_sub)]));
        }
        let mut ops = vec![
            TxOp::put_if(main, Condition::not_exists()),
            TxOp::put_if(lookup_item(email_key(&user.email), &user.id), Condition::not_exists()),
        ];
        if !user.cognito_sub.is_empty() {
            ops.push(TxOp::put_if(
                lookup_item(sub_key(&user.cognito_sub), &user.id),
                Condition::not_exists(),
            ));
        }
        self.store.transact(ops).await
    }

    /// Attach another subject to an existing user. Fails with `StoreError::PreconditionFailed`
    /// if the subject is already taken.
    pub async fn add_linked_sub(&self, user_id: &str, sub: &str) -> Result<(), StoreError> {
        self.store
            .transact(vec![
                TxOp::put_if(lookup_item(sub_key(sub), user_id), Condition::not_exists()),
                TxOp::put(linked_sub_key(user_id, sub).to_item()),
            ])
            .await
    }

    pub async fn list_linked_subs(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = self
            .store
            .query_all(&Query::new(user_pk(user_id)).sk_prefix(LINKED_SUB_PREFIX))
            .await?;
        Ok(rows
            .iter()
            .filter_map(Key::from_item)
            .filter_map(|key| key.sk.strip_prefix(LINKED_SUB_PREFIX).map(str::to_string))
            .collect())
    }

    /// Delete the user and every lookup row pointing at it, in one transaction.
    pub async fn delete_user(&self, user: &User) -> Result<(), StoreError> {
        let mut ops = vec![
            TxOp::delete_if(user_key(&user.id), Condition::exists()),
            TxOp::delete(email_key(&user.email)),
        ];
        if !user.cognito_sub.is_empty() {
            ops.push(TxOp::delete(sub_key(&user.cognito_sub)));
        }
        for sub in self.list_linked_subs(&user.id).await? {
            if sub != user.cognito_sub {
                ops.push(TxOp::delete(sub_key(&sub)));
            }
            ops.push(TxOp::delete(linked_sub_key(&user.id, &sub)));
        }
        self.store.transact(ops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::MemoryStore;

    fn user(id: &str, email: &str, sub: &str) -> User {
        User {
            id: id.to_string(),
            email: email.to_string(),
            cognito_sub: sub.to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(user_key("u_abc"), Key::new("USERS#user,u", "USER#u_abc"));
        let key = email_key("a@b.co");
        assert!(key.pk.starts_with("USERS#email#"));
        assert_eq!(key.pk.len(), "USERS#email#".len() + 2);
        assert_eq!(key.sk, "a@b.co");
        assert_eq!(sub_key("f00d-1"), Key::new("USERS#cognito_sub#f0", "f00d-1"));
        assert_eq!(sub_key("x"), Key::new("USERS#cognito_sub#x", "x"));
        assert_eq!(normalize_email("  Someone@Example.COM "), "someone@example.com");
    }

    #[tokio::test]
    async fn test_put_and_lookup() {
        let store = MemoryStore::new_arc();
        let users = UserStore::new(store.clone());
        let alice = user("u_1", "alice@example.com", "sub-alice");
        users.put_user(&alice).await.unwrap();
        assert_eq!(store.len(), 3);

        assert_eq!(users.get_by_id("u_1").await.unwrap(), Some(alice.clone()));
        assert_eq!(
            users.get_id_by_email("alice@example.com").await.unwrap(),
            Some("u_1".to_string())
        );
        assert_eq!(
            users.get_id_by_sub("sub-alice").await.unwrap(),
            Some("u_1".to_string())
        );
        assert_eq!(users.get_by_id("").await.unwrap(), None);

        // Same email under another id is rejected without writing anything.
        let dup = users
            .put_user(&user("u_2", "alice@example.com", "sub-other"))
            .await;
        assert!(matches!(dup, Err(StoreError::PreconditionFailed)));
        assert_eq!(store.len(), 3);
        assert_eq!(users.get_id_by_sub("sub-other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_linked_subs_and_delete() {
        let store = MemoryStore::new_arc();
        let users = UserStore::new(store.clone());
        let alice = user("u_1", "alice@example.com", "sub-alice");
        users.put_user(&alice).await.unwrap();

        users.add_linked_sub("u_1", "google_123").await.unwrap();
        users.add_linked_sub("u_1", "apple_456").await.unwrap();
        assert!(matches!(
            users.add_linked_sub("u_2", "google_123").await,
            Err(StoreError::PreconditionFailed)
        ));

        let mut linked = users.list_linked_subs("u_1").await.unwrap();
        linked.sort();
        assert_eq!(linked, vec!["apple_456".to_string(), "google_123".to_string()]);
        assert_eq!(
            users.get_id_by_sub("google_123").await.unwrap(),
            Some("u_1".to_string())
        );

        users.delete_user(&alice).await.unwrap();
        assert_eq!(store.len(), 0);
        assert!(matches!(
            users.delete_user(&alice).await,
            Err(StoreError::PreconditionFailed)
        ));
    }
}
