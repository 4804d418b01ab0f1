//! Follow rows, one per side of the relationship.
//!
//! ```text
//! FOLLOWS#USER#<user_id>  / <handle>                          handle, followed_at
//! ARTISTS#<handle>        / FOLLOWED#<followed_at>#<user_id>  user_id, followed_at
//! ```
//!
//! The artist-side sort key leads with the timestamp, so a descending query lists the most
//! recent followers first. Unfollow reads `followed_at` back from the user-side row to find it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artists::{artist_key, artist_pk};
use crate::dynamodb::{av_map, av_s, av_string};
use crate::store::{Clause, Condition, Item, Key, KvStore, Query, StoreError, TxOp, Update};
use crate::utils::time::date_time_iso_str;

const FOLLOWER_COUNT: &str = "follower_count";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Follower {
    pub user_id: String,
    pub followed_at: String,
}

fn user_follow_key(user_id: &str, handle: &str) -> Key {
    Key::new(format!("FOLLOWS#USER#{}", user_id), handle)
}

fn artist_follower_key(handle: &str, followed_at: &str, user_id: &str) -> Key {
    Key::new(
        artist_pk(handle),
        format!("FOLLOWED#{}#{}", followed_at, user_id),
    )
}

pub struct FollowStore {
    store: Arc<dyn KvStore>,
}

impl FollowStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write both follow rows and bump the artist's follower count, atomically. Returns `false`
    /// if the user already follows the artist. Fails with `StoreError::PreconditionFailed` if
    /// the artist does not exist.
    pub async fn follow(
        &self,
        user_id: &str,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let followed_at = date_time_iso_str(&now);
        let mut user_row = user_follow_key(user_id, handle).to_item();
        user_row.extend(av_map(&[
            av_s("handle", handle),
            av_s("followed_at", &followed_at),
        ]));
        let mut artist_row = artist_follower_key(handle, &followed_at, user_id).to_item();
        artist_row.extend(av_map(&[
            av_s("user_id", user_id),
            av_s("followed_at", &followed_at),
        ]));

        let result = self
            .store
            .transact(vec![
                TxOp::put_if(user_row, Condition::not_exists()),
                TxOp::put(artist_row),
                TxOp::update_if(
                    artist_key(handle),
                    Update::new().increment(FOLLOWER_COUNT, 1),
                    Condition::exists(),
                ),
            ])
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(StoreError::PreconditionFailed) => {
                if self.is_following(user_id, handle).await? {
                    Ok(false)
                } else {
                    Err(StoreError::PreconditionFailed)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Delete both follow rows and decrement the follower count. Returns `false` if the user was
    /// not following the artist.
    pub async fn unfollow(&self, user_id: &str, handle: &str) -> Result<bool, StoreError> {
        let followed_at = match self.get_user_row(user_id, handle).await? {
            Some(row) => av_string(&row, "followed_at"),
            None => return Ok(false),
        };
        let user_key = user_follow_key(user_id, handle);
        let artist_row_key = artist_follower_key(handle, &followed_at, user_id);

        let result = self
            .store
            .transact(vec![
                TxOp::delete_if(user_key.clone(), Condition::exists()),
                TxOp::delete(artist_row_key.clone()),
                TxOp::update_if(
                    artist_key(handle),
                    Update::new().increment(FOLLOWER_COUNT, -1),
                    Condition::exists().and(Clause::NumberAtLeast(FOLLOWER_COUNT.to_string(), 1)),
                ),
            ])
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(StoreError::PreconditionFailed) => {
                // Either a concurrent unfollow won, or the counter is already at zero (or the
                // artist is gone). In the second case the rows still have to go.
                let removed = self
                    .store
                    .transact(vec![
                        TxOp::delete_if(user_key, Condition::exists()),
                        TxOp::delete(artist_row_key),
                    ])
                    .await;
                match removed {
                    Ok(()) => Ok(true),
                    Err(StoreError::PreconditionFailed) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Handles the user follows, in handle order.
    pub async fn list_following(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let items = self
            .store
            .query_all(&Query::new(format!("FOLLOWS#USER#{}", user_id)))
            .await?;
        Ok(items.iter().map(|item| av_string(item, "handle")).collect())
    }

    /// Most recent followers first.
    pub async fn list_followers(
        &self,
        handle: &str,
        limit: usize,
    ) -> Result<Vec<Follower>, StoreError> {
        let page = self
            .store
            .query(
                &Query::new(artist_pk(handle))
                    .sk_prefix("FOLLOWED#")
                    .descending()
                    .limit(limit),
            )
            .await?;
        Ok(page
            .items
            .iter()
            .map(|item| Follower {
                user_id: av_string(item, "user_id"),
                followed_at: av_string(item, "followed_at"),
            })
            .collect())
    }

    /// Delete both rows of every follow of an artist, leaving the follower count alone. Used when
    /// the artist itself is going away. Returns the number of follows removed.
    pub async fn remove_all_followers(&self, handle: &str) -> Result<usize, StoreError> {
        let items = self
            .store
            .query_all(&Query::new(artist_pk(handle)).sk_prefix("FOLLOWED#"))
            .await?;
        for item in items.iter() {
            let user_id = av_string(item, "user_id");
            let followed_at = av_string(item, "followed_at");
            self.store
                .transact(vec![
                    TxOp::delete(user_follow_key(&user_id, handle)),
                    TxOp::delete(artist_follower_key(handle, &followed_at, &user_id)),
                ])
                .await?;
        }
        Ok(items.len())
    }

    pub async fn is_following(&self, user_id: &str, handle: &str) -> Result<bool, StoreError> {
        Ok(self.get_user_row(user_id, handle).await?.is_some())
    }

    async fn get_user_row(&self, user_id: &str, handle: &str) -> Result<Option<Item>, StoreError> {
        self.store.get(&user_follow_key(user_id, handle)).await
    }
}
