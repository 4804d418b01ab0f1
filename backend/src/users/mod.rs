//! Users: password accounts held by the identity provider, federated sign-in, and the rows that
//! tie both to our user ids.

pub mod hosted_ui;
pub mod identity;
pub mod jwks;
pub mod service;
pub mod store;

pub use hosted_ui::{CognitoHostedUi, HostedUi};
pub use identity::{CognitoIdp, IdentityProvider, IdpError};
pub use jwks::{cognito_issuer, cognito_jwks_url, HttpJwksFetcher, IdTokenIdentity, JwksCache};
pub use service::UserService;
pub use store::User;
