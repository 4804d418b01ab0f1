use std::sync::Arc;

use chrono::Utc;

use crate::artists::normalize_handle;
use crate::artists::store::ArtistStore;
use crate::error::{invalid_input, AppError};
use crate::follows::store::{FollowStore, Follower};
use crate::store::{KvStore, StoreError};

pub const DEFAULT_FOLLOWERS_LIMIT: usize = 100;
const MAX_FOLLOWERS_LIMIT: usize = 1000;

pub struct FollowService {
    follows: FollowStore,
    artists: ArtistStore,
}

impl FollowService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            follows: FollowStore::new(store.clone()),
            artists: ArtistStore::new(store),
        }
    }

    /// Follow an artist. Following an artist twice is a no-op. Returns whether a new follow was
    /// recorded.
    pub async fn follow(&self, user_id: &str, handle: &str) -> Result<bool, AppError> {
        let handle = checked_handle(user_id, handle)?;
        if self.artists.get(&handle).await?.is_none() {
            return Err(AppError::NotFound);
        }
        match self.follows.follow(user_id, &handle, Utc::now()).await {
            Ok(inserted) => Ok(inserted),
            // Deleted between the read and the write.
            Err(StoreError::PreconditionFailed) => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Unfollow an artist. Unfollowing an artist the user does not follow is a no-op.
    pub async fn unfollow(&self, user_id: &str, handle: &str) -> Result<bool, AppError> {
        let handle = checked_handle(user_id, handle)?;
        Ok(self.follows.unfollow(user_id, &handle).await?)
    }

    pub async fn list_following(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        if user_id.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.follows.list_following(user_id).await?)
    }

    pub async fn is_following(&self, user_id: &str, handle: &str) -> Result<bool, AppError> {
        let handle = normalize_handle(handle);
        if user_id.is_empty() || handle.is_empty() {
            return Ok(false);
        }
        Ok(self.follows.is_following(user_id, &handle).await?)
    }

    /// Most recent followers of an artist. `limit` defaults to 100.
    pub async fn list_followers(
        &self,
        handle: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Follower>, AppError> {
        let handle = normalize_handle(handle);
        if handle.is_empty() || self.artists.get(&handle).await?.is_none() {
            return Err(AppError::NotFound);
        }
        let limit = match limit {
            Some(limit) if limit > 0 => limit.min(MAX_FOLLOWERS_LIMIT),
            _ => DEFAULT_FOLLOWERS_LIMIT,
        };
        Ok(self.follows.list_followers(&handle, limit).await?)
    }
}

fn checked_handle(user_id: &str, handle: &str) -> Result<String, AppError> {
    let handle = normalize_handle(handle);
    if user_id.is_empty() || handle.is_empty() {
        return Err(invalid_input("user_id and handle required"));
    }
    Ok(handle)
}
