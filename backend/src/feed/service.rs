use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::artists::{artist_pk, normalize_handle, ArtistService, Permission};
use crate::error::{invalid_input, AppError};
use crate::feed::slug::slugify;
use crate::feed::store::{Post, PostContent, PostStore};
use crate::follows::FollowStore;
use crate::search::{body_excerpt, FeedDoc, FeedIndex};
use crate::store::{Key, KvStore, StoreError};
use crate::utils::cursor;
use crate::utils::time::date_time_iso_str;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub youtube_url: String,
    #[serde(default)]
    pub explicit: bool,
}

/// Partial post update. `None` fields are left unchanged; `Some("")` clears a text field.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PostUpdate {
    pub body: Option<String>,
    pub image_url: Option<String>,
    pub youtube_url: Option<String>,
    pub explicit: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl PostPage {
    fn empty() -> Self {
        Self {
            posts: vec![],
            has_more: false,
            next_cursor: None,
        }
    }
}

/// Position in an artist's BYTIME rows.
#[derive(Serialize, Deserialize)]
struct PostListCursor {
    p: String,
    s: String,
}

/// Offset into the feed index results.
#[derive(Serialize, Deserialize)]
struct FeedCursor {
    o: usize,
}

/// Page size from a query parameter. Anything outside 1..=100 falls back to the default.
pub fn page_size(limit: Option<usize>) -> usize {
    match limit {
        Some(limit) if limit >= 1 && limit <= MAX_PAGE_SIZE => limit,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Artist posts, and the collated feed of posts from followed artists.
pub struct FeedService {
    posts: PostStore,
    follows: FollowStore,
    artists: ArtistService,
    index: Arc<dyn FeedIndex>,
}

impl FeedService {
    pub fn new(store: Arc<dyn KvStore>, index: Arc<dyn FeedIndex>) -> Self {
        Self {
            posts: PostStore::new(store.clone()),
            follows: FollowStore::new(store.clone()),
            artists: ArtistService::new(store),
            index,
        }
    }

    /// Create a post. Its id is the slug of its title, and must be unique within the artist.
    ///
    /// The post is indexed before this returns. If indexing fails the post is removed again and
    /// the call fails, so a post never exists without being in the feed.
    pub async fn create_post(
        &self,
        handle: &str,
        new_post: NewPost,
        actor_user_id: &str,
    ) -> Result<Post, AppError> {
        let artist = self
            .artists
            .require_permission(handle, actor_user_id, Permission::FeedCreate)
            .await?;
        let title = new_post.title.trim();
        if title.is_empty() {
            return Err(invalid_input("title is required"));
        }
        let post_id = slugify(title);
        if post_id.is_empty() {
            return Err(invalid_input(
                "title must contain at least one letter or number",
            ));
        }
        if self.posts.get(&artist.handle, &post_id).await?.is_some() {
            return Err(slug_taken());
        }

        let post = Post {
            post_id,
            artist_handle: artist.handle,
            title: title.to_string(),
            body: new_post.body.trim().to_string(),
            image_url: new_post.image_url.trim().to_string(),
            youtube_url: new_post.youtube_url.trim().to_string(),
            explicit: new_post.explicit,
            created_at: date_time_iso_str(&Utc::now()),
            updated_at: String::new(),
            created_by_user_id: actor_user_id.to_string(),
        };
        match self.posts.create(&post).await {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed) => return Err(slug_taken()),
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.index.index_post(&feed_doc(&post)).await {
            log::error!(
                "Failed to index post {}/{}: {}",
                post.artist_handle,
                post.post_id,
                e
            );
            if let Err(cleanup) = self.posts.delete(&post).await {
                log::error!("Failed to remove unindexed post: {}", cleanup);
            }
            return Err(e.into());
        }
        Ok(post)
    }

    pub async fn get_post(&self, handle: &str, post_id: &str) -> Result<Post, AppError> {
        let handle = normalize_handle(handle);
        if handle.is_empty() || post_id.is_empty() {
            return Err(AppError::NotFound);
        }
        self.posts
            .get(&handle, post_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// An artist's posts, newest first.
    pub async fn list_posts(
        &self,
        handle: &str,
        limit: Option<usize>,
        page_cursor: Option<&str>,
    ) -> Result<PostPage, AppError> {
        let artist = self.artists.get(handle).await?;
        let start_after = match page_cursor.filter(|c| !c.is_empty()) {
            Some(encoded) => {
                let decoded: PostListCursor =
                    cursor::decode(encoded).ok_or_else(|| invalid_input("invalid cursor"))?;
                if decoded.p != artist_pk(&artist.handle) {
                    return Err(invalid_input("invalid cursor"));
                }
                Some(Key::new(decoded.p, decoded.s))
            }
            None => None,
        };

        let (post_ids, next_key) = self
            .posts
            .list_by_time(&artist.handle, page_size(limit), start_after)
            .await?;
        let posts = self.posts.get_many(&artist.handle, &post_ids).await?;
        let next_cursor = next_key.and_then(|key| {
            cursor::encode(&PostListCursor {
                p: key.pk,
                s: key.sk,
            })
        });
        Ok(PostPage {
            posts,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }

    /// Partial update. The feed index is refreshed in the background; a failure there is logged
    /// and otherwise ignored.
    pub async fn update_post(
        &self,
        handle: &str,
        post_id: &str,
        update: PostUpdate,
        actor_user_id: &str,
    ) -> Result<Post, AppError> {
        let artist = self
            .artists
            .require_permission(handle, actor_user_id, Permission::FeedUpdate)
            .await?;
        let mut post = self
            .posts
            .get(&artist.handle, post_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if let Some(body) = update.body {
            post.body = body.trim().to_string();
        }
        if let Some(image_url) = update.image_url {
            post.image_url = image_url.trim().to_string();
        }
        if let Some(youtube_url) = update.youtube_url {
            post.youtube_url = youtube_url.trim().to_string();
        }
        if let Some(explicit) = update.explicit {
            post.explicit = explicit;
        }
        post.updated_at = date_time_iso_str(&Utc::now());

        let content = PostContent {
            body: post.body.clone(),
            image_url: post.image_url.clone(),
            youtube_url: post.youtube_url.clone(),
            explicit: post.explicit,
        };
        match self
            .posts
            .update(&artist.handle, post_id, &content, &post.updated_at)
            .await
        {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed) => return Err(AppError::NotFound),
            Err(e) => return Err(e.into()),
        }

        let index = self.index.clone();
        let doc = feed_doc(&post);
        tokio::spawn(async move {
            if let Err(e) = index.index_post(&doc).await {
                log::warn!("Failed to reindex post {}: {}", doc.id(), e);
            }
        });
        Ok(post)
    }

    /// Delete a post. Removing it from the feed index is best effort.
    pub async fn delete_post(
        &self,
        handle: &str,
        post_id: &str,
        actor_user_id: &str,
    ) -> Result<(), AppError> {
        let artist = self
            .artists
            .require_permission(handle, actor_user_id, Permission::FeedDelete)
            .await?;
        let post = self
            .posts
            .get(&artist.handle, post_id)
            .await?
            .ok_or(AppError::NotFound)?;
        match self.posts.delete(&post).await {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed) => return Err(AppError::NotFound),
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = self.index.delete_post(&post.artist_handle, post_id).await {
            log::warn!(
                "Failed to remove post {}/{} from feed index: {}",
                post.artist_handle,
                post_id,
                e
            );
        }
        Ok(())
    }

    /// Delete an artist page along with its posts and follows. Only the owner may do this.
    ///
    /// Posts and follows go first, so a failure part way leaves the page in place and the owner
    /// can retry. A later page with the same handle starts empty.
    pub async fn delete_artist(&self, handle: &str, actor_user_id: &str) -> Result<(), AppError> {
        let artist = self
            .artists
            .require_permission(handle, actor_user_id, Permission::ArtistDelete)
            .await?;
        let post_ids = self.posts.delete_all(&artist.handle).await?;
        for post_id in post_ids.iter() {
            if let Err(e) = self.index.delete_post(&artist.handle, post_id).await {
                log::warn!(
                    "Failed to remove post {}/{} from feed index: {}",
                    artist.handle,
                    post_id,
                    e
                );
            }
        }
        let followers = self.follows.remove_all_followers(&artist.handle).await?;
        self.artists.delete(&artist.handle, actor_user_id).await?;
        log::info!(
            "Deleted artist {} with {} posts and {} followers",
            artist.handle,
            post_ids.len(),
            followers
        );
        Ok(())
    }

    /// Posts from every artist the user follows, newest first.
    ///
    /// The index decides which posts and in what order. Posts are then read from the store; any
    /// the store no longer has (deleted, but the index has not caught up) are dropped.
    pub async fn my_feed(
        &self,
        user_id: &str,
        limit: Option<usize>,
        page_cursor: Option<&str>,
    ) -> Result<PostPage, AppError> {
        let size = page_size(limit);
        let from = match page_cursor.filter(|c| !c.is_empty()) {
            Some(encoded) => {
                cursor::decode::<FeedCursor>(encoded)
                    .ok_or_else(|| invalid_input("invalid cursor"))?
                    .o
            }
            None => 0,
        };

        let handles = self.follows.list_following(user_id).await?;
        if handles.is_empty() {
            return Ok(PostPage::empty());
        }

        let mut hits = self.index.search_feed(&handles, size + 1, from).await?;
        let has_more = hits.len() > size;
        hits.truncate(size);
        if hits.is_empty() {
            return Ok(PostPage::empty());
        }

        let mut ids_by_handle: HashMap<&str, Vec<String>> = HashMap::new();
        for hit in hits.iter() {
            ids_by_handle
                .entry(hit.artist_handle.as_str())
                .or_default()
                .push(hit.post_id.clone());
        }
        let mut hydrated: HashMap<(String, String), Post> = HashMap::new();
        for (handle, post_ids) in ids_by_handle.iter() {
            for post in self.posts.get_many(handle, post_ids).await? {
                hydrated.insert((post.artist_handle.clone(), post.post_id.clone()), post);
            }
        }
        let posts = hits
            .iter()
            .filter_map(|hit| hydrated.remove(&(hit.artist_handle.clone(), hit.post_id.clone())))
            .collect();

        let next_cursor = if has_more {
            cursor::encode(&FeedCursor { o: from + size })
        } else {
            None
        };
        Ok(PostPage {
            posts,
            has_more,
            next_cursor,
        })
    }
}

fn feed_doc(post: &Post) -> FeedDoc {
    FeedDoc {
        post_id: post.post_id.clone(),
        artist_handle: post.artist_handle.clone(),
        created_at: post.created_at.clone(),
        body_excerpt: body_excerpt(&post.body),
        explicit: post.explicit,
    }
}

fn slug_taken() -> AppError {
    AppError::Conflict("a post with this title already exists for this artist".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::artists::Role;
    use crate::follows::FollowService;
    use crate::store::Query;
    use crate::testing::{FakeFeedIndex, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        index: Arc<FakeFeedIndex>,
        artists: ArtistService,
        follows: FollowService,
        feed: FeedService,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new_arc();
        let index = Arc::new(FakeFeedIndex::new());
        let artists = ArtistService::new(store.clone());
        artists.create("u_owner", "abcd", "", "").await.unwrap();
        artists.create("u_other", "wxyz", "", "").await.unwrap();
        Fixture {
            store: store.clone(),
            index: index.clone(),
            artists,
            follows: FollowService::new(store.clone()),
            feed: FeedService::new(store, index),
        }
    }

    fn roles(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn titled(title: &str) -> NewPost {
        NewPost {
            title: title.to_string(),
            body: format!("all about {}", title),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_post_slug_rules() {
        let f = fixture().await;
        let post = f
            .feed
            .create_post("abcd", titled("Same Title"), "u_owner")
            .await
            .unwrap();
        assert_eq!(post.post_id, "same-title");
        assert_eq!(post.title, "Same Title");
        assert!(f.index.contains("abcd", "same-title"));

        let again = f
            .feed
            .create_post("abcd", titled("  same   TITLE "), "u_owner")
            .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));

        // Slugs are per artist.
        assert!(f
            .feed
            .create_post("wxyz", titled("Same Title"), "u_other")
            .await
            .is_ok());
        assert!(f
            .feed
            .create_post("abcd", titled("Other Title"), "u_owner")
            .await
            .is_ok());

        for bad in &["", "   ", "!!!"] {
            let result = f.feed.create_post("abcd", titled(bad), "u_owner").await;
            assert!(matches!(result, Err(AppError::InvalidInput(_))), "{:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_post_mutations_are_role_gated() {
        let f = fixture().await;
        f.artists
            .add_member("abcd", "u_feed", &roles(&["feed"]), "u_owner")
            .await
            .unwrap();
        f.artists
            .add_member("abcd", "u_music", &roles(&["music"]), "u_owner")
            .await
            .unwrap();

        assert!(f
            .feed
            .create_post("abcd", titled("By Feed"), "u_feed")
            .await
            .is_ok());
        assert!(matches!(
            f.feed
                .create_post("abcd", titled("By Music"), "u_music")
                .await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            f.feed
                .delete_post("abcd", "by-feed", "u_stranger")
                .await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            f.feed.create_post("nope", titled("x"), "u_owner").await,
            Err(AppError::NotFound)
        ));
        let roles_of_feed = f
            .artists
            .list_members("abcd", "u_feed")
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.user_id == "u_feed")
            .unwrap()
            .roles;
        assert_eq!(roles_of_feed, vec![Role::Feed]);
    }

    #[tokio::test]
    async fn test_failed_index_write_fails_create() {
        let f = fixture().await;
        let rows_before = f.store.len();
        f.index.fail_writes(true);
        let result = f
            .feed
            .create_post("abcd", titled("Unindexed"), "u_owner")
            .await;
        assert!(matches!(result, Err(AppError::Unavailable(_))));
        assert_eq!(f.store.len(), rows_before);

        f.index.fail_writes(false);
        assert!(f
            .feed
            .create_post("abcd", titled("Unindexed"), "u_owner")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_update_post_partial() {
        let f = fixture().await;
        f.feed
            .create_post(
                "abcd",
                NewPost {
                    title: "Hello".to_string(),
                    body: "first".to_string(),
                    image_url: "https://img.example/a.png".to_string(),
                    ..Default::default()
                },
                "u_owner",
            )
            .await
            .unwrap();

        let updated = f
            .feed
            .update_post(
                "abcd",
                "hello",
                PostUpdate {
                    body: Some("second".to_string()),
                    explicit: Some(true),
                    ..Default::default()
                },
                "u_owner",
            )
            .await
            .unwrap();
        assert_eq!(updated.body, "second");
        assert!(updated.explicit);
        assert_eq!(updated.image_url, "https://img.example/a.png");
        assert!(!updated.updated_at.is_empty());
        assert_eq!(f.feed.get_post("abcd", "hello").await.unwrap(), updated);

        let cleared = f
            .feed
            .update_post(
                "abcd",
                "hello",
                PostUpdate {
                    image_url: Some("".to_string()),
                    ..Default::default()
                },
                "u_owner",
            )
            .await
            .unwrap();
        assert_eq!(cleared.image_url, "");
        assert_eq!(cleared.body, "second");

        // Index failures never fail an update.
        f.index.fail_writes(true);
        assert!(f
            .feed
            .update_post("abcd", "hello", PostUpdate::default(), "u_owner")
            .await
            .is_ok());

        let missing = f
            .feed
            .update_post("abcd", "nope", PostUpdate::default(), "u_owner")
            .await;
        assert!(matches!(missing, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_posts_pages() {
        let f = fixture().await;
        for title in &["One", "Two", "Three"] {
            f.feed
                .create_post("abcd", titled(title), "u_owner")
                .await
                .unwrap();
            tokio::time::delay_for(std::time::Duration::from_millis(2)).await;
        }

        let page = f.feed.list_posts("abcd", Some(2), None).await.unwrap();
        let ids: Vec<&str> = page.posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["three", "two"]);
        assert!(page.has_more);

        let page = f
            .feed
            .list_posts("abcd", Some(2), page.next_cursor.as_deref())
            .await
            .unwrap();
        let ids: Vec<&str> = page.posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["one"]);
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);

        assert!(matches!(
            f.feed.list_posts("abcd", None, Some("garbage")).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            f.feed.list_posts("nope", None, None).await,
            Err(AppError::NotFound)
        ));
        assert_eq!(page_size(Some(0)), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(101)), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(100)), 100);
    }

    #[tokio::test]
    async fn test_my_feed_collates_followed_artists() {
        let f = fixture().await;
        assert_eq!(
            f.feed.my_feed("u_fan", None, None).await.unwrap(),
            PostPage::empty()
        );

        f.follows.follow("u_fan", "abcd").await.unwrap();
        f.follows.follow("u_fan", "wxyz").await.unwrap();
        for (handle, owner, title) in &[
            ("abcd", "u_owner", "A1"),
            ("wxyz", "u_other", "W1"),
            ("abcd", "u_owner", "A2"),
            ("wxyz", "u_other", "W2"),
        ] {
            f.feed
                .create_post(handle, titled(title), owner)
                .await
                .unwrap();
            tokio::time::delay_for(std::time::Duration::from_millis(2)).await;
        }

        let page = f.feed.my_feed("u_fan", Some(3), None).await.unwrap();
        let ids: Vec<(&str, &str)> = page
            .posts
            .iter()
            .map(|p| (p.artist_handle.as_str(), p.post_id.as_str()))
            .collect();
        assert_eq!(ids, vec![("wxyz", "w2"), ("abcd", "a2"), ("wxyz", "w1")]);
        assert!(page.has_more);

        let page = f
            .feed
            .my_feed("u_fan", Some(3), page.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].post_id, "a1");
        assert!(!page.has_more);

        // Deleted posts disappear from the feed.
        f.feed.delete_post("abcd", "a2", "u_owner").await.unwrap();
        let page = f.feed.my_feed("u_fan", None, None).await.unwrap();
        let ids: Vec<&str> = page.posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["w2", "w1", "a1"]);
    }

    #[tokio::test]
    async fn test_my_feed_drops_posts_missing_from_store() {
        let f = fixture().await;
        f.follows.follow("u_fan", "abcd").await.unwrap();
        f.feed
            .create_post("abcd", titled("Kept"), "u_owner")
            .await
            .unwrap();
        // Simulate index lag: the index still has a post the store has never seen.
        f.index.insert(FeedDoc {
            post_id: "ghost".to_string(),
            artist_handle: "abcd".to_string(),
            created_at: "2999-01-01T00:00:00.000Z".to_string(),
            body_excerpt: String::new(),
            explicit: false,
        });
        let page = f.feed.my_feed("u_fan", None, None).await.unwrap();
        let ids: Vec<&str> = page.posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["kept"]);
    }

    #[tokio::test]
    async fn test_delete_artist_removes_posts_and_follows() {
        let f = fixture().await;
        f.feed
            .create_post("abcd", titled("First"), "u_owner")
            .await
            .unwrap();
        f.feed
            .create_post("abcd", titled("Second"), "u_owner")
            .await
            .unwrap();
        f.feed
            .create_post("wxyz", titled("Elsewhere"), "u_other")
            .await
            .unwrap();
        f.follows.follow("u_fan", "abcd").await.unwrap();
        f.follows.follow("u_fan", "wxyz").await.unwrap();

        let forbidden = f.feed.delete_artist("abcd", "u_other").await;
        assert!(matches!(forbidden, Err(AppError::Forbidden)));
        assert!(f.index.contains("abcd", "first"));

        f.feed.delete_artist("abcd", "u_owner").await.unwrap();
        let leftover = f
            .store
            .query_all(&Query::new(artist_pk("abcd")))
            .await
            .unwrap();
        assert!(leftover.is_empty());
        assert!(!f.index.contains("abcd", "first"));
        assert!(!f.index.contains("abcd", "second"));
        assert!(f.index.contains("wxyz", "elsewhere"));
        assert_eq!(
            f.follows.list_following("u_fan").await.unwrap(),
            vec!["wxyz".to_string()]
        );

        // Someone else takes the handle and starts from nothing.
        f.artists.create("u_new", "abcd", "", "").await.unwrap();
        let page = f.feed.list_posts("abcd", None, None).await.unwrap();
        assert!(page.posts.is_empty());
        assert!(f
            .follows
            .list_followers("abcd", None)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            f.feed.delete_artist("zzzz", "u_owner").await,
            Err(AppError::NotFound)
        ));
    }
}
