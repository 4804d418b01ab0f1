pub mod cookies;
pub mod pkce;
pub mod service;
pub mod store;
pub mod tokens;

pub use service::{AuthCodeGrant, AuthService, TokenPair};
pub use store::{default_client_policies, ClientPolicy, CredentialStore};
pub use tokens::{SessionIdentity, SessionSigner};
