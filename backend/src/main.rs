mod activity;
mod artists;
mod auth;
mod config;
mod dynamodb;
mod error;
mod feed;
mod follows;
mod http;
mod ids;
mod search;
mod stats;
mod store;
#[cfg(test)]
mod testing;
mod users;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};

use activity::ActivityStore;
use artists::ArtistService;
use auth::{default_client_policies, AuthService, CredentialStore, SessionSigner};
use config::config;
use dynamodb::DynamoStore;
use feed::FeedService;
use follows::FollowService;
use http::federated::FederatedConfig;
use search::{FeedIndex, OpenSearchIndex};
use stats::Metrics;
use store::KvStore;
use users::{
    cognito_issuer, cognito_jwks_url, CognitoHostedUi, CognitoIdp, HttpJwksFetcher,
    IdentityProvider, JwksCache, UserService,
};

/// Everything the HTTP handlers need, shared across workers.
pub struct BackendService {
    pub auth: AuthService,
    pub users: UserService,
    pub artists: ArtistService,
    pub follows: FollowService,
    pub feed: FeedService,
    pub metrics: Metrics,
    pub cookie_secure: bool,
    /// `None` when federated login is not configured.
    pub federated: Option<FederatedConfig>,
}

impl BackendService {
    pub fn new(
        store: Arc<dyn KvStore>,
        index: Arc<dyn FeedIndex>,
        idp: Arc<dyn IdentityProvider>,
        signer: Arc<SessionSigner>,
        metrics: Metrics,
        cookie_secure: bool,
        federated: Option<FederatedConfig>,
    ) -> Self {
        Self {
            auth: AuthService::new(
                CredentialStore::new(store.clone()),
                signer,
                ActivityStore::new(store.clone(), metrics.mau_unique_users_seen.clone()),
            ),
            users: UserService::new(store.clone(), idp),
            artists: ArtistService::new(store.clone()),
            follows: FollowService::new(store.clone()),
            feed: FeedService::new(store, index),
            metrics,
            cookie_secure,
            federated,
        }
    }
}

fn federated_config() -> anyhow::Result<Option<FederatedConfig>> {
    let config = config();
    let (domain, callback_url) = match (
        config.cognito_hosted_ui_domain.as_deref(),
        config.cognito_callback_url.as_deref(),
    ) {
        (Some(domain), Some(callback_url)) => (domain, callback_url),
        _ => {
            log::info!("Federated login is not configured");
            return Ok(None);
        }
    };
    let timeout = Duration::from_millis(config.search_timeout_ms);
    let hosted_ui = CognitoHostedUi::new(
        domain,
        &config.cognito_client_id,
        config.cognito_client_secret.as_deref(),
        callback_url,
        timeout,
    )?;
    let fetcher = HttpJwksFetcher::new(
        &cognito_jwks_url(&config.aws_region, &config.cognito_user_pool_id),
        timeout,
    )?;
    let jwks = JwksCache::new(
        Box::new(fetcher),
        &cognito_issuer(&config.aws_region, &config.cognito_user_pool_id),
        &config.cognito_client_id,
    );
    if config.oauth_state_secret.is_none() {
        log::warn!("oauth_state_secret is not set. Federated login runs without CSRF state");
    }
    Ok(Some(FederatedConfig {
        hosted_ui: Arc::new(hosted_ui),
        jwks,
        frontend_redirect_uri: config.frontend_redirect_uri.clone(),
        state_secret: config.oauth_state_secret.clone(),
    }))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = config();
    simple_logger::SimpleLogger::new()
        .with_level(config.log_level)
        .init()?;

    let metrics = Metrics::install().unwrap_or_else(|e| {
        log::warn!("Failed to install the metrics recorder. /metrics is disabled: {}", e);
        Metrics::disabled()
    });

    let dynamodb_client = dynamodb::create_dynamodb_client(
        &config.aws_region,
        config.dynamodb_endpoint.as_deref(),
    )?;
    let table_name = dynamodb::table_name(&config.dynamodb_env, &config.dynamodb_table);
    log::info!("Using DynamoDB table {}", table_name);
    let store: Arc<dyn KvStore> = Arc::new(DynamoStore::new(
        Arc::new(dynamodb_client),
        table_name,
        Duration::from_millis(config.store_timeout_ms),
    ));

    let index = OpenSearchIndex::new(
        &config.opensearch_endpoint,
        &config.opensearch_feed_index,
        Duration::from_millis(config.search_timeout_ms),
    )?;
    index.ensure_index().await?;
    log::info!("Feed index {} is ready", config.opensearch_feed_index);

    let idp = CognitoIdp::new(
        &config.aws_region,
        &config.cognito_user_pool_id,
        &config.cognito_client_id,
        config.cognito_client_secret.as_deref(),
    )?;
    let signer =
        SessionSigner::from_pem_files(&config.jwt_private_key_path, &config.jwt_public_key_path)?;

    let service = BackendService::new(
        store,
        Arc::new(index),
        Arc::new(idp),
        Arc::new(signer),
        metrics,
        config.cookie_secure,
        federated_config()?,
    );
    let written = service
        .auth
        .ensure_clients(&default_client_policies())
        .await?;
    log::info!("Seeded {} auth client policies", written);

    let data = web::Data::new(service);
    let addr = format!("0.0.0.0:{}", config.http_port);
    log::info!("Starting HTTP server on {}", addr);
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(data.clone())
            .configure(http::configure)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
