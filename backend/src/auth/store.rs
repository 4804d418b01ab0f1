//! Persistence for sessions, refresh tokens, authorization codes and client TTL policies.
//!
//! Rows:
//!
//! ```text
//! AUTH#SESSION#<id>    / SESSION            the session
//! AUTH#REFRESH#<id>    / REFRESH            the refresh token
//! AUTH#USER#<user_id>  / SESSION#<id>       user -> sessions index
//! AUTH#USER#<user_id>  / REFRESH#<id>       user -> refresh tokens index
//! AUTH#CODE#<code>     / CODE               one-time authorization code
//! AUTH#CLIENT          / CLIENT#<id>        client TTL policy
//! ```
//!
//! A session and its refresh token are created together and revoked together, along with both
//! index rows, in a single transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dynamodb::{av_get_n, av_get_s, av_map, av_n, av_s, av_string, s_val};
use crate::store::{Clause, Condition, Item, Key, KvStore, Query, StoreError, TxOp, Update};
use crate::utils::time::{date_time_iso_str, parse_date_time};

const CLIENT_PK: &str = "AUTH#CLIENT";

#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub refresh_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefreshRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthCodeRecord {
    pub code: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub user_id: String,
    pub client_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Session and refresh token lifetimes for one client, eg. "web" or "ios".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientPolicy {
    pub client_id: String,
    pub session_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

impl ClientPolicy {
    pub fn new(client_id: &str, session_ttl_seconds: i64, refresh_ttl_seconds: i64) -> Self {
        Self {
            client_id: client_id.to_string(),
            session_ttl_seconds,
            refresh_ttl_seconds,
        }
    }
}

/// The clients we seed at startup. Browsers get short sessions; native apps stay signed in.
pub fn default_client_policies() -> Vec<ClientPolicy> {
    const WEB_SESSION: i64 = 15 * 60;
    const WEB_REFRESH: i64 = 7 * 24 * 3600;
    const NATIVE_SESSION: i64 = 30 * 24 * 3600;
    const NATIVE_REFRESH: i64 = 90 * 24 * 3600;
    vec![
        ClientPolicy::new("web", WEB_SESSION, WEB_REFRESH),
        ClientPolicy::new("ios", NATIVE_SESSION, NATIVE_REFRESH),
        ClientPolicy::new("android", NATIVE_SESSION, NATIVE_REFRESH),
        ClientPolicy::new("desktop", NATIVE_SESSION, NATIVE_REFRESH),
    ]
}

fn session_key(session_id: &str) -> Key {
    Key::new(format!("AUTH#SESSION#{}", session_id), "SESSION")
}

fn refresh_key(refresh_id: &str) -> Key {
    Key::new(format!("AUTH#REFRESH#{}", refresh_id), "REFRESH")
}

fn user_index_pk(user_id: &str) -> String {
    format!("AUTH#USER#{}", user_id)
}

fn user_session_key(user_id: &str, session_id: &str) -> Key {
    Key::new(user_index_pk(user_id), format!("SESSION#{}", session_id))
}

fn user_refresh_key(user_id: &str, refresh_id: &str) -> Key {
    Key::new(user_index_pk(user_id), format!("REFRESH#{}", refresh_id))
}

fn auth_code_key(code: &str) -> Key {
    Key::new(format!("AUTH#CODE#{}", code), "CODE")
}

fn client_key(client_id: &str) -> Key {
    Key::new(CLIENT_PK, format!("CLIENT#{}", client_id))
}

fn with_attrs(key: Key, attrs: Item) -> Item {
    let mut item = key.to_item();
    item.extend(attrs);
    item
}

fn get_time(item: &Item, name: &str) -> Option<DateTime<Utc>> {
    parse_date_time(av_get_s(item, name)?)
}

pub struct CredentialStore {
    store: Arc<dyn KvStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write a session, its refresh token and both user index rows atomically.
    pub async fn create_session(
        &self,
        session: &SessionRecord,
        refresh: &RefreshRecord,
    ) -> Result<(), StoreError> {
        let session_item = with_attrs(
            session_key(&session.id),
            av_map(&[
                av_s("user_id", &session.user_id),
                av_s("refresh_id", &session.refresh_id),
                av_s("expires_at", &date_time_iso_str(&session.expires_at)),
            ]),
        );
        let refresh_item = with_attrs(
            refresh_key(&refresh.id),
            av_map(&[
                av_s("user_id", &refresh.user_id),
                av_s("session_id", &refresh.session_id),
                av_s("expires_at", &date_time_iso_str(&refresh.expires_at)),
            ]),
        );
        self.store
            .transact(vec![
                TxOp::put_if(session_item, Condition::not_exists()),
                TxOp::put_if(refresh_item, Condition::not_exists()),
                TxOp::put(user_session_key(&session.user_id, &session.id).to_item()),
                TxOp::put(user_refresh_key(&refresh.user_id, &refresh.id).to_item()),
            ])
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let item = match self.store.get(&session_key(session_id)).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        Ok(get_time(&item, "expires_at").map(|expires_at| SessionRecord {
            id: session_id.to_string(),
            user_id: av_string(&item, "user_id"),
            refresh_id: av_string(&item, "refresh_id"),
            expires_at,
        }))
    }

    pub async fn get_refresh(&self, refresh_id: &str) -> Result<Option<RefreshRecord>, StoreError> {
        let item = match self.store.get(&refresh_key(refresh_id)).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        Ok(get_time(&item, "expires_at").map(|expires_at| RefreshRecord {
            id: refresh_id.to_string(),
            user_id: av_string(&item, "user_id"),
            session_id: av_string(&item, "session_id"),
            expires_at,
        }))
    }

    /// Revoke a refresh token and its linked session. Returns `false` when the refresh token was
    /// already gone, including when a concurrent caller revoked it first.
    pub async fn revoke_refresh(&self, refresh_id: &str) -> Result<bool, StoreError> {
        let refresh = match self.get_refresh(refresh_id).await? {
            Some(refresh) => refresh,
            None => return Ok(false),
        };
        self.revoke_pair(&refresh.user_id, &refresh.session_id, refresh_id, false)
            .await
    }

    /// Revoke a session and its linked refresh token. Returns `false` when already gone.
    pub async fn revoke_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let session = match self.get_session(session_id).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        self.revoke_pair(&session.user_id, session_id, &session.refresh_id, true)
            .await
    }

    /// Delete all four rows of a session/refresh pair. The row we read first (the session when
    /// `via_session`, otherwise the refresh token) is deleted conditionally, so that exactly one
    /// concurrent revoker wins.
    async fn revoke_pair(
        &self,
        user_id: &str,
        session_id: &str,
        refresh_id: &str,
        via_session: bool,
    ) -> Result<bool, StoreError> {
        let mut ops = if via_session {
            vec![
                TxOp::delete_if(session_key(session_id), Condition::exists()),
                TxOp::delete(refresh_key(refresh_id)),
            ]
        } else {
            vec![
                TxOp::delete_if(refresh_key(refresh_id), Condition::exists()),
                TxOp::delete(session_key(session_id)),
            ]
        };
        ops.push(TxOp::delete(user_session_key(user_id, session_id)));
        ops.push(TxOp::delete(user_refresh_key(user_id, refresh_id)));
        match self.store.transact(ops).await {
            Ok(()) => Ok(true),
            Err(StoreError::PreconditionFailed) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Revoke every session and refresh token of a user. Returns the number of pairs revoked.
    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let index_rows = self
            .store
            .query_all(&Query::new(user_index_pk(user_id)))
            .await?;
        let mut revoked = 0;
        for row in index_rows.iter() {
            let sk = av_get_s(row, "sk").unwrap_or_default();
            if let Some(session_id) = sk.strip_prefix("SESSION#") {
                if self.revoke_session(session_id).await? {
                    revoked += 1;
                }
            }
        }
        // Refresh tokens whose session row is already gone still have to go.
        for row in index_rows.iter() {
            let sk = av_get_s(row, "sk").unwrap_or_default();
            if let Some(refresh_id) = sk.strip_prefix("REFRESH#") {
                if self.revoke_refresh(refresh_id).await? {
                    revoked += 1;
                }
            }
        }
        Ok(revoked)
    }

    pub async fn put_auth_code(&self, code: &AuthCodeRecord) -> Result<(), StoreError> {
        let item = with_attrs(
            auth_code_key(&code.code),
            av_map(&[
                av_s("code_challenge", &code.code_challenge),
                av_s("code_challenge_method", &code.code_challenge_method),
                av_s("user_id", &code.user_id),
                av_s("client_id", &code.client_id),
                av_s("expires_at", &date_time_iso_str(&code.expires_at)),
            ]),
        );
        self.store.put(item, Condition::not_exists()).await
    }

    /// Fetch an authorization code and mark it consumed, atomically.
    ///
    /// Returns `None` if the code does not exist, has expired, was already consumed, or was
    /// consumed by a concurrent caller between our read and our conditional write. Expired codes
    /// are deleted on the way out.
    pub async fn consume_auth_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthCodeRecord>, StoreError> {
        let key = auth_code_key(code);
        let item = match self.store.get(&key).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        let expires_at = match get_time(&item, "expires_at") {
            Some(expires_at) if expires_at > now => expires_at,
            _ => {
                self.store.delete(&key, Condition::none()).await?;
                return Ok(None);
            }
        };
        if item.contains_key("consumed_at") {
            return Ok(None);
        }
        let consumed = self
            .store
            .update(
                &key,
                Update::new().set("consumed_at", s_val(&date_time_iso_str(&now))),
                Condition::exists().and(Clause::AttrNotExists("consumed_at".to_string())),
            )
            .await;
        match consumed {
            Ok(()) => Ok(Some(AuthCodeRecord {
                code: code.to_string(),
                code_challenge: av_string(&item, "code_challenge"),
                code_challenge_method: av_string(&item, "code_challenge_method"),
                user_id: av_string(&item, "user_id"),
                client_id: av_string(&item, "client_id"),
                expires_at,
            })),
            Err(StoreError::PreconditionFailed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Option<ClientPolicy>, StoreError> {
        let item = match self.store.get(&client_key(client_id)).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        match (
            av_get_n::<i64>(&item, "session_ttl_seconds"),
            av_get_n::<i64>(&item, "refresh_ttl_seconds"),
        ) {
            (Some(session_ttl_seconds), Some(refresh_ttl_seconds)) => Ok(Some(ClientPolicy {
                client_id: client_id.to_string(),
                session_ttl_seconds,
                refresh_ttl_seconds,
            })),
            _ => Ok(None),
        }
    }

    /// Write each policy that is missing or differs from what is stored. Returns the number of
    /// rows written.
    pub async fn ensure_clients(&self, policies: &[ClientPolicy]) -> Result<usize, StoreError> {
        let mut written = 0;
        for policy in policies.iter() {
            if self.get_client(&policy.client_id).await?.as_ref() == Some(policy) {
                continue;
            }
            let item = with_attrs(
                client_key(&policy.client_id),
                av_map(&[
                    av_s("client_id", &policy.client_id),
                    av_n("session_ttl_seconds", policy.session_ttl_seconds),
                    av_n("refresh_ttl_seconds", policy.refresh_ttl_seconds),
                ]),
            );
            self.store.put(item, Condition::none()).await?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    use crate::testing::MemoryStore;

    fn pair(user_id: &str, session_id: &str, refresh_id: &str) -> (SessionRecord, RefreshRecord) {
        let now = Utc::now();
        (
            SessionRecord {
                id: session_id.to_string(),
                user_id: user_id.to_string(),
                refresh_id: refresh_id.to_string(),
                expires_at: now + Duration::minutes(15),
            },
            RefreshRecord {
                id: refresh_id.to_string(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                expires_at: now + Duration::days(7),
            },
        )
    }

    fn code(code: &str, expires_at: DateTime<Utc>) -> AuthCodeRecord {
        AuthCodeRecord {
            code: code.to_string(),
            code_challenge: "challenge".to_string(),
            code_challenge_method: "S256".to_string(),
            user_id: "u_1".to_string(),
            client_id: "web".to_string(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_create_and_revoke_session() {
        let store = MemoryStore::new_arc();
        let credentials = CredentialStore::new(store.clone());
        let (session, refresh) = pair("u_1", "s_1", "r_1");
        credentials.create_session(&session, &refresh).await.unwrap();

        assert_eq!(credentials.get_session("s_1").await.unwrap(), Some(session.clone()));
        assert_eq!(credentials.get_refresh("r_1").await.unwrap(), Some(refresh));
        assert_eq!(store.len(), 4);

        // Creating the same session twice fails.
        let (session, refresh) = pair("u_1", "s_1", "r_1");
        let again = credentials.create_session(&session, &refresh).await;
        assert!(matches!(again, Err(StoreError::PreconditionFailed)));

        assert!(credentials.revoke_refresh("r_1").await.unwrap());
        assert!(credentials.get_session("s_1").await.unwrap().is_none());
        assert!(credentials.get_refresh("r_1").await.unwrap().is_none());
        assert_eq!(store.len(), 0);

        assert!(!credentials.revoke_refresh("r_1").await.unwrap());
        assert!(!credentials.revoke_session("s_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let store = MemoryStore::new_arc();
        let credentials = CredentialStore::new(store.clone());
        for i in 0..3 {
            let (session, refresh) = pair("u_1", &format!("s_{}", i), &format!("r_{}", i));
            credentials.create_session(&session, &refresh).await.unwrap();
        }
        let (session, refresh) = pair("u_2", "s_other", "r_other");
        credentials.create_session(&session, &refresh).await.unwrap();

        assert_eq!(credentials.revoke_all_for_user("u_1").await.unwrap(), 3);
        assert!(credentials.get_session("s_0").await.unwrap().is_none());
        assert!(credentials.get_session("s_other").await.unwrap().is_some());
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_auth_code_is_single_use() {
        let credentials = CredentialStore::new(MemoryStore::new_arc());
        let now = Utc::now();
        credentials
            .put_auth_code(&code("c_1", now + Duration::minutes(5)))
            .await
            .unwrap();

        let first = credentials.consume_auth_code("c_1", now).await.unwrap();
        assert_eq!(first.map(|c| c.user_id), Some("u_1".to_string()));
        assert!(credentials.consume_auth_code("c_1", now).await.unwrap().is_none());
        assert!(credentials.consume_auth_code("c_missing", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_auth_code_exchange() {
        let credentials = Arc::new(CredentialStore::new(MemoryStore::new_arc()));
        let now = Utc::now();
        credentials
            .put_auth_code(&code("c_1", now + Duration::minutes(5)))
            .await
            .unwrap();
        let attempts = (0..8).map(|_| {
            let credentials = credentials.clone();
            async move { credentials.consume_auth_code("c_1", now).await.unwrap() }
        });
        let results = futures::future::join_all(attempts).await;
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn test_expired_auth_code_is_deleted() {
        let store = MemoryStore::new_arc();
        let credentials = CredentialStore::new(store.clone());
        let now = Utc::now();
        credentials
            .put_auth_code(&code("c_old", now - Duration::seconds(1)))
            .await
            .unwrap();
        assert!(credentials.consume_auth_code("c_old", now).await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_ensure_clients() {
        let credentials = CredentialStore::new(MemoryStore::new_arc());
        let policies = default_client_policies();
        assert_eq!(credentials.ensure_clients(&policies).await.unwrap(), 4);
        assert_eq!(credentials.ensure_clients(&policies).await.unwrap(), 0);

        let changed = vec![ClientPolicy::new("web", 60, 120)];
        assert_eq!(credentials.ensure_clients(&changed).await.unwrap(), 1);
        assert_eq!(
            credentials.get_client("web").await.unwrap(),
            Some(ClientPolicy::new("web", 60, 120))
        );
        assert!(credentials.get_client("toaster").await.unwrap().is_none());
    }
}
