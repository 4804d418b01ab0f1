//! In-process stand-ins for everything the backend talks to, and a `BackendService` wired to them.

pub mod memory_store;

pub use memory_store::MemoryStore;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use uuid::Uuid;

use crate::auth::{default_client_policies, SessionSigner};
use crate::http::federated::FederatedConfig;
use crate::search::{doc_id, FeedDoc, FeedHit, FeedIndex, SearchError};
use crate::stats::Metrics;
use crate::users::hosted_ui::{HostedUi, HostedUiError};
use crate::users::identity::{IdentityProvider, IdpError};
use crate::users::jwks::tests::test_jwks_cache;
use crate::BackendService;

/// Signs with `testdata/jwt_test_private.pem`. Never use these keys outside tests.
pub fn test_session_signer() -> SessionSigner {
    SessionSigner::from_pem(
        include_bytes!("../../testdata/jwt_test_private.pem"),
        include_bytes!("../../testdata/jwt_test_public.pem"),
    )
    .unwrap()
}

/// `FeedIndex` over a map, with the same filter and sort as the real query.
#[derive(Default)]
pub struct FakeFeedIndex {
    docs: Mutex<BTreeMap<String, FeedDoc>>,
    fail_writes: AtomicBool,
}

impl FakeFeedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, handle: &str, post_id: &str) -> bool {
        self.docs
            .lock()
            .unwrap()
            .contains_key(&doc_id(handle, post_id))
    }

    /// Make writes fail, as if the cluster were down.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Add a document without going through `index_post`.
    pub fn insert(&self, doc: FeedDoc) {
        self.docs.lock().unwrap().insert(doc.id(), doc);
    }

    fn check_writable(&self) -> Result<(), SearchError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(SearchError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FeedIndex for FakeFeedIndex {
    async fn ensure_index(&self) -> Result<(), SearchError> {
        Ok(())
    }

    async fn index_post(&self, doc: &FeedDoc) -> Result<(), SearchError> {
        self.check_writable()?;
        self.insert(doc.clone());
        Ok(())
    }

    async fn delete_post(&self, handle: &str, post_id: &str) -> Result<(), SearchError> {
        self.check_writable()?;
        self.docs.lock().unwrap().remove(&doc_id(handle, post_id));
        Ok(())
    }

    async fn search_feed(
        &self,
        handles: &[String],
        size: usize,
        from: usize,
    ) -> Result<Vec<FeedHit>, SearchError> {
        let docs = self.docs.lock().unwrap();
        let mut matching: Vec<&FeedDoc> = docs
            .values()
            .filter(|doc| handles.contains(&doc.artist_handle))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(from)
            .take(size)
            .map(|doc| FeedHit {
                post_id: doc.post_id.clone(),
                artist_handle: doc.artist_handle.clone(),
                created_at: doc.created_at.clone(),
                explicit: doc.explicit,
            })
            .collect())
    }
}

/// `IdentityProvider` keeping users and passwords in a map.
#[derive(Default)]
pub struct FakeIdentityProvider {
    // email -> (sub, password)
    users: Mutex<HashMap<String, (String, String)>>,
}

impl FakeIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, email: &str) -> bool {
        self.users.lock().unwrap().contains_key(email)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<String, IdpError> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(email) {
            return Err(IdpError::UsernameExists);
        }
        let sub = Uuid::new_v4().to_string();
        users.insert(email.to_string(), (sub.clone(), password.to_string()));
        Ok(sub)
    }

    async fn initiate_auth(&self, email: &str, password: &str) -> Result<String, IdpError> {
        match self.users.lock().unwrap().get(email) {
            Some((sub, stored)) if stored == password => Ok(sub.clone()),
            _ => Err(IdpError::NotAuthorized),
        }
    }

    async fn admin_delete_user(&self, email: &str) -> Result<(), IdpError> {
        self.users.lock().unwrap().remove(email);
        Ok(())
    }
}

/// `HostedUi` that trades codes registered with `insert` for their ID tokens.
#[derive(Default)]
pub struct FakeHostedUi {
    id_tokens: Mutex<HashMap<String, String>>,
}

impl FakeHostedUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, code: &str, id_token: &str) {
        self.id_tokens
            .lock()
            .unwrap()
            .insert(code.to_string(), id_token.to_string());
    }
}

#[async_trait]
impl HostedUi for FakeHostedUi {
    fn authorize_url(
        &self,
        identity_provider: &str,
        state: Option<&str>,
    ) -> Result<Url, HostedUiError> {
        let mut params = vec![("identity_provider", identity_provider)];
        if let Some(state) = state {
            params.push(("state", state));
        }
        Url::parse_with_params("https://auth.example.com/oauth2/authorize", &params)
            .map_err(|e| HostedUiError::Transport(e.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, HostedUiError> {
        self.id_tokens
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| HostedUiError::Rejected("400 Bad Request".to_string()))
    }
}

async fn backend_service(federated: Option<FederatedConfig>) -> BackendService {
    let service = BackendService::new(
        MemoryStore::new_arc(),
        Arc::new(FakeFeedIndex::new()),
        Arc::new(FakeIdentityProvider::new()),
        Arc::new(test_session_signer()),
        Metrics::local(),
        false,
        federated,
    );
    service
        .auth
        .ensure_clients(&default_client_policies())
        .await
        .unwrap();
    service
}

/// A service over empty fakes, with the default clients seeded and federated login off.
pub async fn default_backend_service() -> BackendService {
    backend_service(None).await
}

/// Like `default_backend_service`, with federated login through `hosted_ui`.
pub async fn federated_backend_service(
    hosted_ui: Arc<FakeHostedUi>,
    frontend_redirect_uri: Option<&str>,
    state_secret: Option<&str>,
) -> BackendService {
    backend_service(Some(FederatedConfig {
        hosted_ui,
        jwks: test_jwks_cache(),
        frontend_redirect_uri: frontend_redirect_uri.map(str::to_string),
        state_secret: state_secret.map(str::to_string),
    }))
    .await
}

/// An `Authorization` header value for a fresh web session of `user_id`.
pub async fn bearer(service: &BackendService, user_id: &str) -> String {
    let policy = service.auth.get_client("web").await.unwrap().unwrap();
    let pair = service.auth.new_session(user_id, &policy).await.unwrap();
    format!("Bearer {}", pair.session_token)
}
