//! Post rows live in the artist's partition, next to the artist row.
//!
//! ```text
//! ARTISTS#<handle>  / POST#<post_id>                          the full post
//! ARTISTS#<handle>  / POST#BYTIME#<created_at>#<post_id>      post_id, created_at
//! ```
//!
//! The BYTIME row exists iff the post row exists. It lets an artist's posts be listed newest
//! first without reading full post bodies.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::artists::artist_pk;
use crate::dynamodb::{av_bool, av_get_bool, av_map, av_s, av_string, bool_val, s_val};
use crate::store::{Condition, Item, Key, KvStore, Query, StoreError, TxOp, Update};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Post {
    pub post_id: String,
    pub artist_handle: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub youtube_url: String,
    pub explicit: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
    pub created_by_user_id: String,
}

/// The mutable fields of a post. The title is fixed because the post id is derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct PostContent {
    pub body: String,
    pub image_url: String,
    pub youtube_url: String,
    pub explicit: bool,
}

fn post_key(handle: &str, post_id: &str) -> Key {
    Key::new(artist_pk(handle), format!("POST#{}", post_id))
}

fn by_time_key(handle: &str, created_at: &str, post_id: &str) -> Key {
    Key::new(
        artist_pk(handle),
        format!("POST#BYTIME#{}#{}", created_at, post_id),
    )
}

fn item_to_post(item: &Item) -> Post {
    Post {
        post_id: av_string(item, "post_id"),
        artist_handle: av_string(item, "artist_handle"),
        title: av_string(item, "title"),
        body: av_string(item, "body"),
        image_url: av_string(item, "image_url"),
        youtube_url: av_string(item, "youtube_url"),
        explicit: av_get_bool(item, "explicit").unwrap_or(false),
        created_at: av_string(item, "created_at"),
        updated_at: av_string(item, "updated_at"),
        created_by_user_id: av_string(item, "created_by_user_id"),
    }
}

pub struct PostStore {
    store: Arc<dyn KvStore>,
}

impl PostStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write the post and its BYTIME row. Fails with `StoreError::PreconditionFailed` if a post
    /// with the same id already exists.
    pub async fn create(&self, post: &Post) -> Result<(), StoreError> {
        let mut main = post_key(&post.artist_handle, &post.post_id).to_item();
        main.extend(av_map(&[
            av_s("post_id", &post.post_id),
            av_s("artist_handle", &post.artist_handle),
            av_s("title", &post.title),
            av_s("body", &post.body),
            av_s("image_url", &post.image_url),
            av_s("youtube_url", &post.youtube_url),
            av_bool("explicit", post.explicit),
            av_s("created_at", &post.created_at),
            av_s("created_by_user_id", &post.created_by_user_id),
        ]));
        let mut by_time =
            by_time_key(&post.artist_handle, &post.created_at, &post.post_id).to_item();
        by_time.extend(av_map(&[
            av_s("post_id", &post.post_id),
            av_s("created_at", &post.created_at),
        ]));
        self.store
            .transact(vec![
                TxOp::put_if(main, Condition::not_exists()),
                TxOp::put_if(by_time, Condition::not_exists()),
            ])
            .await
    }

    pub async fn get(&self, handle: &str, post_id: &str) -> Result<Option<Post>, StoreError> {
        let item = self.store.get(&post_key(handle, post_id)).await?;
        Ok(item.as_ref().map(item_to_post))
    }

    /// One page of post ids, newest first. Reads one row past `limit` so the returned key is
    /// only present when another page really exists.
    pub async fn list_by_time(
        &self,
        handle: &str,
        limit: usize,
        start_after: Option<Key>,
    ) -> Result<(Vec<String>, Option<Key>), StoreError> {
        let page = self
            .store
            .query(
                &Query::new(artist_pk(handle))
                    .sk_prefix("POST#BYTIME#")
                    .descending()
                    .limit(limit + 1)
                    .start_after(start_after),
            )
            .await?;
        let mut items = page.items;
        let next = if items.len() > limit {
            items.truncate(limit);
            items.last().and_then(Key::from_item)
        } else {
            None
        };
        Ok((
            items.iter().map(|item| av_string(item, "post_id")).collect(),
            next,
        ))
    }

    /// Fetch several posts of one artist. Missing posts are skipped; the result follows the
    /// order of `post_ids`.
    pub async fn get_many(
        &self,
        handle: &str,
        post_ids: &[String],
    ) -> Result<Vec<Post>, StoreError> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }
        let keys: Vec<Key> = post_ids.iter().map(|id| post_key(handle, id)).collect();
        let mut by_id: HashMap<String, Post> = self
            .store
            .batch_get(&keys)
            .await?
            .iter()
            .map(item_to_post)
            .map(|post| (post.post_id.clone(), post))
            .collect();
        Ok(post_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Overwrite the mutable fields. Fails with `StoreError::PreconditionFailed` if the post is
    /// gone.
    pub async fn update(
        &self,
        handle: &str,
        post_id: &str,
        content: &PostContent,
        updated_at: &str,
    ) -> Result<(), StoreError> {
        self.store
            .update(
                &post_key(handle, post_id),
                Update::new()
                    .set("body", s_val(&content.body))
                    .set("image_url", s_val(&content.image_url))
                    .set("youtube_url", s_val(&content.youtube_url))
                    .set("explicit", bool_val(content.explicit))
                    .set("updated_at", s_val(updated_at)),
                Condition::exists(),
            )
            .await
    }

    pub async fn delete(&self, post: &Post) -> Result<(), StoreError> {
        self.store
            .transact(vec![
                TxOp::delete_if(
                    post_key(&post.artist_handle, &post.post_id),
                    Condition::exists(),
                ),
                TxOp::delete(by_time_key(
                    &post.artist_handle,
                    &post.created_at,
                    &post.post_id,
                )),
            ])
            .await
    }

    /// Delete every post row and BYTIME row of an artist. Returns the ids of the posts removed.
    pub async fn delete_all(&self, handle: &str) -> Result<Vec<String>, StoreError> {
        let items = self
            .store
            .query_all(&Query::new(artist_pk(handle)).sk_prefix("POST#"))
            .await?;
        let mut post_ids = BTreeSet::new();
        for item in items.iter() {
            if let Some(key) = Key::from_item(item) {
                self.store.delete(&key, Condition::none()).await?;
            }
            post_ids.insert(av_string(item, "post_id"));
        }
        post_ids.remove("");
        Ok(post_ids.into_iter().collect())
    }
}
