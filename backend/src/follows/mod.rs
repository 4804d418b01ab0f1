//! Users following artists.

pub mod service;
pub mod store;

pub use service::FollowService;
pub use store::{FollowStore, Follower};
