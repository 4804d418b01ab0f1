//! Roles on an artist page, and the permissions they grant.
//!
//! A user can hold several roles on one page. `owner` is set once, when the page is created, and
//! can never be assigned through the member API. Deleting the page is not granted by any role:
//! only the owner may do it.

use std::collections::BTreeSet;

use enum_iterator::IntoEnumIterator;
use serde::Serialize;

use crate::error::{invalid_input, AppError};

#[derive(
    Clone, Copy, Debug, IntoEnumIterator, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Feed,
    Music,
    Photos,
    Gigs,
}

#[derive(Clone, Copy, Debug, IntoEnumIterator, PartialEq, Eq, Hash)]
pub enum Permission {
    ArtistUpdate,
    ArtistDelete,
    ArtistManageMembers,
    ArtistListMembers,
    FeedCreate,
    FeedUpdate,
    FeedDelete,
    MusicManage,
    PhotosManage,
    GigsManage,
}

use Permission::*;

/// Everything except `ArtistDelete`.
const MANAGER_PERMISSIONS: &[Permission] = &[
    ArtistUpdate,
    ArtistManageMembers,
    ArtistListMembers,
    FeedCreate,
    FeedUpdate,
    FeedDelete,
    MusicManage,
    PhotosManage,
    GigsManage,
];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Feed => "feed",
            Role::Music => "music",
            Role::Photos => "photos",
            Role::Gigs => "gigs",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        Role::into_enum_iter().find(|role| role.as_str() == s)
    }

    pub fn permissions(&self) -> &'static [Permission] {
        match *self {
            Role::Owner | Role::Admin => MANAGER_PERMISSIONS,
            Role::Feed => &[FeedCreate, FeedUpdate, FeedDelete, ArtistListMembers],
            Role::Music => &[MusicManage, ArtistListMembers],
            Role::Photos => &[PhotosManage, ArtistListMembers],
            Role::Gigs => &[GigsManage, ArtistListMembers],
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn is_assignable(&self) -> bool {
        *self != Role::Owner
    }
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ArtistUpdate => "artist:update",
            ArtistDelete => "artist:delete",
            ArtistManageMembers => "artist:manage_members",
            ArtistListMembers => "artist:list_members",
            FeedCreate => "feed:create",
            FeedUpdate => "feed:update",
            FeedDelete => "feed:delete",
            MusicManage => "music:manage",
            PhotosManage => "photos:manage",
            GigsManage => "gigs:manage",
        }
    }
}

/// Roles that can be handed out through the member API.
pub fn assignable_roles() -> Vec<Role> {
    Role::into_enum_iter().filter(Role::is_assignable).collect()
}

/// Whether any of the roles grants the permission. No roles grant nothing.
pub fn roles_grant_permission(roles: &[Role], permission: Permission) -> bool {
    roles.iter().any(|role| role.grants(permission))
}

/// Stored role tags to roles. Unknown tags are ignored.
pub fn parse_stored_roles(tags: &[String]) -> Vec<Role> {
    let roles: BTreeSet<Role> = tags.iter().filter_map(|tag| Role::parse(tag)).collect();
    roles.into_iter().collect()
}

pub fn role_tags(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|role| role.as_str().to_string()).collect()
}

/// Validate a role set requested through the member API. Tags are trimmed and lowercased,
/// duplicates collapse, and the result is in canonical order. Unknown tags, `owner`, and an empty
/// set are rejected.
pub fn parse_assignable_roles(tags: &[String]) -> Result<Vec<Role>, AppError> {
    let mut roles = BTreeSet::new();
    for tag in tags.iter() {
        let tag = tag.trim().to_lowercase();
        match Role::parse(&tag) {
            Some(role) if role.is_assignable() => {
                roles.insert(role);
            }
            _ => return Err(invalid_input(&format!("invalid role: {:?}", tag))),
        }
    }
    if roles.is_empty() {
        return Err(invalid_input("at least one role is required"));
    }
    Ok(roles.into_iter().collect())
}
