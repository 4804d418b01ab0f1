//! Artist posts and the collated feed.

pub mod service;
pub mod slug;
pub mod store;

pub use service::{FeedService, NewPost, PostPage, PostUpdate};
pub use store::Post;
