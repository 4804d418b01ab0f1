//! Artist pages: the artist rows, member rows, the role engine and the service tying them
//! together.

pub mod members;
pub mod roles;
pub mod service;
pub mod store;

pub use members::Member;
pub use roles::{Permission, Role};
pub use service::{normalize_handle, ArtistService, ArtistWithRole};
pub use store::{artist_key, artist_pk, Artist};
