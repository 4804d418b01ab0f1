//! Artist rows.
//!
//! ```text
//! ARTISTS#<handle>        / ARTIST            handle, display_name, bio, owner_user_id,
//!                                             created_at, follower_count
//! ARTISTS#USER#<user_id>  / ARTIST#<handle>   handle, display_name, created_at
//! ```
//!
//! The owner index row mirrors `display_name`, so renames touch both rows. `follower_count` is
//! only ever changed by the follow store, in the same transaction as a follow row.

use std::sync::Arc;

use serde::Serialize;

use crate::dynamodb::{av_get_n, av_map, av_n, av_s, av_string, s_val};
use crate::store::{Condition, Item, Key, KvStore, Query, StoreError, TxOp, Update};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Artist {
    pub handle: String,
    pub display_name: String,
    pub bio: String,
    pub owner_user_id: String,
    pub created_at: String,
    pub follower_count: i64,
}

pub fn artist_pk(handle: &str) -> String {
    format!("ARTISTS#{}", handle)
}

pub fn artist_key(handle: &str) -> Key {
    Key::new(artist_pk(handle), "ARTIST")
}

fn owner_index_key(user_id: &str, handle: &str) -> Key {
    Key::new(format!("ARTISTS#USER#{}", user_id), format!("ARTIST#{}", handle))
}

fn item_to_artist(item: &Item) -> Artist {
    Artist {
        handle: av_string(item, "handle"),
        display_name: av_string(item, "display_name"),
        bio: av_string(item, "bio"),
        owner_user_id: av_string(item, "owner_user_id"),
        created_at: av_string(item, "created_at"),
        follower_count: av_get_n::<i64>(item, "follower_count").unwrap_or(0),
    }
}

pub struct ArtistStore {
    store: Arc<dyn KvStore>,
}

impl ArtistStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, handle: &str) -> Result<Option<Artist>, StoreError> {
        let item = self.store.get(&artist_key(handle)).await?;
        Ok(item.as_ref().map(item_to_artist))
    }

    /// Fetch several artists. Missing handles are skipped; the result follows the input order.
    pub async fn get_many(&self, handles: &[String]) -> Result<Vec<Artist>, StoreError> {
        let keys: Vec<Key> = handles.iter().map(|handle| artist_key(handle)).collect();
        let mut found: Vec<Artist> = self
            .store
            .batch_get(&keys)
            .await?
            .iter()
            .map(item_to_artist)
            .collect();
        let mut ordered = Vec::with_capacity(found.len());
        for handle in handles.iter() {
            if let Some(idx) = found.iter().position(|artist| &artist.handle == handle) {
                ordered.push(found.swap_remove(idx));
            }
        }
        Ok(ordered)
    }

    /// Handles of the artists a user owns, in handle order.
    pub async fn list_handles_by_owner(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let items = self
            .store
            .query_all(&Query::new(format!("ARTISTS#USER#{}", user_id)).sk_prefix("ARTIST#"))
            .await?;
        Ok(items.iter().map(|item| av_string(item, "handle")).collect())
    }

    /// Create the artist and its owner index row, plus any `extra` writes, atomically. Fails with
    /// `StoreError::PreconditionFailed` if the handle is taken.
    pub async fn create(&self, artist: &Artist, extra: Vec<TxOp>) -> Result<(), StoreError> {
        let mut main = artist_key(&artist.handle).to_item();
        main.extend(av_map(&[
            av_s("handle", &artist.handle),
            av_s("display_name", &artist.display_name),
            av_s("bio", &artist.bio),
            av_s("owner_user_id", &artist.owner_user_id),
            av_s("created_at", &artist.created_at),
            av_n("follower_count", artist.follower_count),
        ]));
        let mut index = owner_index_key(&artist.owner_user_id, &artist.handle).to_item();
        index.extend(av_map(&[
            av_s("handle", &artist.handle),
            av_s("display_name", &artist.display_name),
            av_s("created_at", &artist.created_at),
        ]));
        let mut ops = vec![
            TxOp::put_if(main, Condition::not_exists()),
            TxOp::put_if(index, Condition::not_exists()),
        ];
        ops.extend(extra);
        self.store.transact(ops).await
    }

    /// Set `display_name` and `bio` on the artist, and `display_name` on the owner index row.
    pub async fn update(
        &self,
        handle: &str,
        owner_user_id: &str,
        display_name: &str,
        bio: &str,
    ) -> Result<(), StoreError> {
        self.store
            .transact(vec![
                TxOp::update_if(
                    artist_key(handle),
                    Update::new()
                        .set("display_name", s_val(display_name))
                        .set("bio", s_val(bio)),
                    Condition::exists(),
                ),
                TxOp::update_if(
                    owner_index_key(owner_user_id, handle),
                    Update::new().set("display_name", s_val(display_name)),
                    Condition::exists(),
                ),
            ])
            .await
    }

    /// Delete the artist and its owner index row, plus any `extra` writes, atomically.
    pub async fn delete(&self, artist: &Artist, extra: Vec<TxOp>) -> Result<(), StoreError> {
        let mut ops = vec![
            TxOp::delete_if(artist_key(&artist.handle), Condition::exists()),
            TxOp::delete(owner_index_key(&artist.owner_user_id, &artist.handle)),
        ];
        ops.extend(extra);
        self.store.transact(ops).await
    }
}
