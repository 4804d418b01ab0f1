//! Member rows: who holds which roles on an artist page.
//!
//! ```text
//! ARTISTS#<handle>               / MEMBER#<user_id>   user_id, roles
//! ARTIST_MEMBERS#USER#<user_id>  / ARTIST#<handle>    handle, roles
//! ```
//!
//! The second row mirrors the first so that a user's memberships can be listed without a scan.
//! Member writes are conditional on the artist row, so a page deleted concurrently does not gain
//! orphaned members.

use std::sync::Arc;

use serde::Serialize;

use crate::artists::roles::{parse_stored_roles, role_tags, Role};
use crate::artists::store::artist_key;
use crate::dynamodb::{av_get_string_list, av_map, av_s, av_string, av_string_list};
use crate::store::{Condition, Item, Key, KvStore, Query, StoreError, TxOp};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Member {
    pub user_id: String,
    pub roles: Vec<Role>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Membership {
    pub handle: String,
    pub roles: Vec<Role>,
}

fn member_key(handle: &str, user_id: &str) -> Key {
    Key::new(format!("ARTISTS#{}", handle), format!("MEMBER#{}", user_id))
}

fn member_index_key(user_id: &str, handle: &str) -> Key {
    Key::new(
        format!("ARTIST_MEMBERS#USER#{}", user_id),
        format!("ARTIST#{}", handle),
    )
}

fn stored_roles(item: &Item) -> Vec<Role> {
    parse_stored_roles(&av_get_string_list(item, "roles").unwrap_or_default())
}

fn member_items(handle: &str, user_id: &str, roles: &[Role]) -> (Item, Item) {
    let tags = role_tags(roles);
    let mut member = member_key(handle, user_id).to_item();
    member.extend(av_map(&[
        av_s("user_id", user_id),
        av_string_list("roles", &tags),
    ]));
    let mut index = member_index_key(user_id, handle).to_item();
    index.extend(av_map(&[av_s("handle", handle), av_string_list("roles", &tags)]));
    (member, index)
}

pub struct MemberStore {
    store: Arc<dyn KvStore>,
}

impl MemberStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, handle: &str, user_id: &str) -> Result<Option<Vec<Role>>, StoreError> {
        let item = self.store.get(&member_key(handle, user_id)).await?;
        Ok(item.map(|item| stored_roles(&item)))
    }

    pub async fn list_by_artist(&self, handle: &str) -> Result<Vec<Member>, StoreError> {
        let items = self
            .store
            .query_all(&Query::new(format!("ARTISTS#{}", handle)).sk_prefix("MEMBER#"))
            .await?;
        Ok(items
            .iter()
            .map(|item| Member {
                user_id: av_string(item, "user_id"),
                roles: stored_roles(item),
            })
            .collect())
    }

    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Membership>, StoreError> {
        let items = self
            .store
            .query_all(
                &Query::new(format!("ARTIST_MEMBERS#USER#{}", user_id)).sk_prefix("ARTIST#"),
            )
            .await?;
        Ok(items
            .iter()
            .map(|item| Membership {
                handle: av_string(item, "handle"),
                roles: stored_roles(item),
            })
            .collect())
    }

    /// Writes for a member row and its mirror. Put replaces any previous roles.
    pub fn put_ops(handle: &str, user_id: &str, roles: &[Role]) -> Vec<TxOp> {
        let (member, index) = member_items(handle, user_id, roles);
        vec![TxOp::put(member), TxOp::put(index)]
    }

    pub fn delete_ops(handle: &str, user_id: &str) -> Vec<TxOp> {
        vec![
            TxOp::delete(member_key(handle, user_id)),
            TxOp::delete(member_index_key(user_id, handle)),
        ]
    }

    /// Add a member or replace their roles. Fails with `PreconditionFailed` if the artist row is
    /// gone.
    pub async fn put(&self, handle: &str, user_id: &str, roles: &[Role]) -> Result<(), StoreError> {
        let mut ops = vec![TxOp::check(artist_key(handle), Condition::exists())];
        ops.extend(Self::put_ops(handle, user_id, roles));
        self.store.transact(ops).await
    }

    /// Replace the roles of an existing member. Fails with `PreconditionFailed` if the member row
    /// or the artist row is gone.
    pub async fn update_roles(
        &self,
        handle: &str,
        user_id: &str,
        roles: &[Role],
    ) -> Result<(), StoreError> {
        let (member, index) = member_items(handle, user_id, roles);
        self.store
            .transact(vec![
                TxOp::check(artist_key(handle), Condition::exists()),
                TxOp::put_if(member, Condition::exists()),
                TxOp::put(index),
            ])
            .await
    }

    pub async fn delete(&self, handle: &str, user_id: &str) -> Result<(), StoreError> {
        self.store.transact(Self::delete_ops(handle, user_id)).await
    }
}
