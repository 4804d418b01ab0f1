use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::artists::members::{Member, MemberStore};
use crate::artists::roles::{parse_assignable_roles, roles_grant_permission, Permission, Role};
use crate::artists::store::{Artist, ArtistStore};
use crate::error::{invalid_input, AppError};
use crate::store::{KvStore, StoreError};
use crate::utils::time::date_time_iso_str;

/// Artist pages and the people who run them.
///
/// Handles are 4 to 64 lowercase letters or digits. Three-letter names stay free for platform
/// subdomains (www, api, ...).
pub struct ArtistService {
    artists: ArtistStore,
    members: MemberStore,
}

/// An artist as seen by one user: either they own it, or they are a member with some roles.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArtistWithRole {
    #[serde(flatten)]
    pub artist: Artist,
    pub role: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Role>,
}

pub fn normalize_handle(handle: &str) -> String {
    handle.trim().to_lowercase()
}

pub fn is_valid_handle(handle: &str) -> bool {
    (4..=64).contains(&handle.len())
        && handle
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

impl ArtistService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            artists: ArtistStore::new(store.clone()),
            members: MemberStore::new(store),
        }
    }

    pub async fn create(
        &self,
        owner_user_id: &str,
        handle: &str,
        display_name: &str,
        bio: &str,
    ) -> Result<Artist, AppError> {
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return Err(invalid_input("handle required"));
        }
        if !is_valid_handle(&handle) {
            return Err(invalid_input(
                "handle must be 4 to 64 lowercase letters or numbers, no spaces or special \
                 characters",
            ));
        }
        let display_name = match display_name.trim() {
            "" => handle.clone(),
            trimmed => trimmed.to_string(),
        };
        if self.artists.get(&handle).await?.is_some() {
            return Err(handle_taken());
        }

        let artist = Artist {
            handle: handle.clone(),
            display_name,
            bio: bio.trim().to_string(),
            owner_user_id: owner_user_id.to_string(),
            created_at: date_time_iso_str(&Utc::now()),
            follower_count: 0,
        };
        let owner_member = MemberStore::put_ops(&handle, owner_user_id, &[Role::Owner]);
        match self.artists.create(&artist, owner_member).await {
            Ok(()) => Ok(artist),
            Err(StoreError::PreconditionFailed) => Err(handle_taken()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, handle: &str) -> Result<Artist, AppError> {
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return Err(AppError::NotFound);
        }
        self.artists.get(&handle).await?.ok_or(AppError::NotFound)
    }

    /// Every page the user owns, followed by every page they are a member of.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<ArtistWithRole>, AppError> {
        let owned_handles = self.artists.list_handles_by_owner(user_id).await?;
        let mut out: Vec<ArtistWithRole> = self
            .artists
            .get_many(&owned_handles)
            .await?
            .into_iter()
            .map(|artist| ArtistWithRole {
                artist,
                role: "owner",
                roles: vec![],
            })
            .collect();

        let memberships: Vec<_> = self
            .members
            .list_by_user(user_id)
            .await?
            .into_iter()
            .filter(|m| !owned_handles.contains(&m.handle))
            .collect();
        let member_handles: Vec<String> = memberships.iter().map(|m| m.handle.clone()).collect();
        let member_artists = self.artists.get_many(&member_handles).await?;
        for artist in member_artists.into_iter() {
            let roles = memberships
                .iter()
                .find(|m| m.handle == artist.handle)
                .map(|m| m.roles.clone())
                .unwrap_or_default();
            out.push(ArtistWithRole {
                artist,
                role: "member",
                roles,
            });
        }
        Ok(out)
    }

    /// Partial update. `None` leaves a field unchanged. An empty `display_name` also leaves it
    /// unchanged, but an empty `bio` clears the bio.
    pub async fn update(
        &self,
        handle: &str,
        display_name: Option<&str>,
        bio: Option<&str>,
        actor_user_id: &str,
    ) -> Result<Artist, AppError> {
        let mut artist = self
            .require_permission(handle, actor_user_id, Permission::ArtistUpdate)
            .await?;
        if let Some(display_name) = display_name.map(str::trim) {
            if !display_name.is_empty() {
                artist.display_name = display_name.to_string();
            }
        }
        if let Some(bio) = bio {
            artist.bio = bio.trim().to_string();
        }
        match self
            .artists
            .update(
                &artist.handle,
                &artist.owner_user_id,
                &artist.display_name,
                &artist.bio,
            )
            .await
        {
            Ok(()) => Ok(artist),
            Err(StoreError::PreconditionFailed) => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the page along with every member row. Only the owner may do this.
    pub async fn delete(&self, handle: &str, actor_user_id: &str) -> Result<(), AppError> {
        let artist = self
            .require_permission(handle, actor_user_id, Permission::ArtistDelete)
            .await?;
        let members = self.members.list_by_artist(&artist.handle).await?;
        match self
            .artists
            .delete(
                &artist,
                MemberStore::delete_ops(&artist.handle, &artist.owner_user_id),
            )
            .await
        {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed) => return Err(AppError::NotFound),
            Err(e) => return Err(e.into()),
        }
        for member in members
            .iter()
            .filter(|m| m.user_id != artist.owner_user_id)
        {
            self.members.delete(&artist.handle, &member.user_id).await?;
        }
        Ok(())
    }

    /// Whether the user may perform `permission` on the page. The owner may do anything.
    /// Otherwise the user needs a member row with a role that grants the permission.
    pub async fn has_permission(
        &self,
        handle: &str,
        user_id: &str,
        permission: Permission,
    ) -> Result<bool, AppError> {
        let handle = normalize_handle(handle);
        if handle.is_empty() || user_id.is_empty() {
            return Ok(false);
        }
        match self.artists.get(&handle).await? {
            Some(artist) => self.artist_permits(&artist, user_id, permission).await,
            None => Ok(false),
        }
    }

    /// Load the artist and check the actor's permission on it: `NotFound` if the artist does not
    /// exist, `Forbidden` if the actor lacks the permission.
    pub async fn require_permission(
        &self,
        handle: &str,
        actor_user_id: &str,
        permission: Permission,
    ) -> Result<Artist, AppError> {
        let artist = self.get(handle).await?;
        if self
            .artist_permits(&artist, actor_user_id, permission)
            .await?
        {
            Ok(artist)
        } else {
            Err(AppError::Forbidden)
        }
    }

    async fn artist_permits(
        &self,
        artist: &Artist,
        user_id: &str,
        permission: Permission,
    ) -> Result<bool, AppError> {
        if user_id.is_empty() {
            return Ok(false);
        }
        if artist.owner_user_id == user_id {
            return Ok(true);
        }
        let roles = self
            .members
            .get(&artist.handle, user_id)
            .await?
            .unwrap_or_default();
        Ok(roles_grant_permission(&roles, permission))
    }

    pub async fn add_member(
        &self,
        handle: &str,
        user_id: &str,
        roles: &[String],
        actor_user_id: &str,
    ) -> Result<Member, AppError> {
        let artist = self
            .require_permission(handle, actor_user_id, Permission::ArtistManageMembers)
            .await?;
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(invalid_input("user_id required"));
        }
        if artist.owner_user_id == user_id {
            return Err(AppError::OwnerRolesImmutable);
        }
        let roles = parse_assignable_roles(roles)?;
        match self.members.put(&artist.handle, user_id, &roles).await {
            Ok(()) => Ok(Member {
                user_id: user_id.to_string(),
                roles,
            }),
            // The page was deleted after the permission check.
            Err(StoreError::PreconditionFailed) => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Removing someone who is not a member is a no-op. Removing the owner is an error.
    pub async fn remove_member(
        &self,
        handle: &str,
        user_id: &str,
        actor_user_id: &str,
    ) -> Result<(), AppError> {
        let artist = self
            .require_permission(handle, actor_user_id, Permission::ArtistManageMembers)
            .await?;
        if artist.owner_user_id == user_id {
            return Err(AppError::CannotRemoveOwner);
        }
        self.members.delete(&artist.handle, user_id).await?;
        Ok(())
    }

    /// Replace a member's roles. The user must still be a member when the write lands, so a
    /// concurrent removal is not undone.
    pub async fn update_member_roles(
        &self,
        handle: &str,
        user_id: &str,
        roles: &[String],
        actor_user_id: &str,
    ) -> Result<Member, AppError> {
        let artist = self
            .require_permission(handle, actor_user_id, Permission::ArtistManageMembers)
            .await?;
        if artist.owner_user_id == user_id {
            return Err(AppError::OwnerRolesImmutable);
        }
        let roles = parse_assignable_roles(roles)?;
        match self
            .members
            .update_roles(&artist.handle, user_id, &roles)
            .await
        {
            Ok(()) => Ok(Member {
                user_id: user_id.to_string(),
                roles,
            }),
            Err(StoreError::PreconditionFailed) => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// All members, owner included. If the owner's member row is missing, an owner entry is
    /// synthesized from the artist row.
    pub async fn list_members(
        &self,
        handle: &str,
        actor_user_id: &str,
    ) -> Result<Vec<Member>, AppError> {
        let artist = self
            .require_permission(handle, actor_user_id, Permission::ArtistListMembers)
            .await?;
        let rows = self.members.list_by_artist(&artist.handle).await?;
        let mut out = Vec::with_capacity(rows.len() + 1);
        if !rows.iter().any(|m| m.user_id == artist.owner_user_id) {
            out.push(Member {
                user_id: artist.owner_user_id.clone(),
                roles: vec![Role::Owner],
            });
        }
        out.extend(rows);
        Ok(out)
    }
}

fn handle_taken() -> AppError {
    AppError::Conflict("handle already in use".to_string())
}
