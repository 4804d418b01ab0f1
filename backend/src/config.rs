use clap::{value_t, App, Arg, ArgMatches};
use lazy_static::lazy_static;

lazy_static! {
    static ref CONFIG: Config = parse_command_line_flags();
}

#[derive(Debug)]
pub struct Config {
    pub http_port: u16,
    pub aws_region: String,
    pub dynamodb_env: String,
    pub dynamodb_table: String,
    pub dynamodb_endpoint: Option<String>,
    pub store_timeout_ms: u64,
    pub opensearch_endpoint: String,
    pub opensearch_feed_index: String,
    pub search_timeout_ms: u64,
    pub jwt_private_key_path: String,
    pub jwt_public_key_path: String,
    pub cookie_secure: bool,
    pub cognito_user_pool_id: String,
    pub cognito_client_id: String,
    pub cognito_client_secret: Option<String>,
    pub cognito_hosted_ui_domain: Option<String>,
    pub cognito_callback_url: Option<String>,
    pub frontend_redirect_uri: Option<String>,
    pub oauth_state_secret: Option<String>,
    pub log_level: log::LevelFilter,
}

impl Config {
    /// Federated login needs both the hosted UI domain and the callback registered with it.
    pub fn federated_login_enabled(&self) -> bool {
        self.cognito_hosted_ui_domain.is_some() && self.cognito_callback_url.is_some()
    }
}

pub fn config() -> &'static Config {
    &CONFIG
}

/// A flag that is also read from the upper-cased environment variable of the same name.
fn flag<'a>(name: &'a str, env: &'a str, help: &'a str, value_name: &'a str) -> Arg<'a, 'a> {
    Arg::with_name(name)
        .long(name)
        .env(env)
        .help(help)
        .takes_value(true)
        .value_name(value_name)
}

fn optional(matches: &ArgMatches, name: &str) -> Option<String> {
    matches
        .value_of(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn required(matches: &ArgMatches, name: &str) -> String {
    optional(matches, name).unwrap_or_default()
}

fn parse_command_line_flags() -> Config {
    let matches = App::new("artistpage")
        .version("0.1")
        .arg(
            flag("http_port", "HTTP_PORT", "The port for the HTTP server", "PORT")
                .default_value("8080"),
        )
        .arg(
            flag("aws_region", "AWS_REGION", "The AWS region", "REGION")
                .default_value("us-east-1"),
        )
        .arg(
            flag(
                "dynamodb_env",
                "DYNAMODB_ENV",
                "Prefix for DynamoDB table names, eg. local, staging, prod",
                "ENV",
            )
            .default_value("local"),
        )
        .arg(
            flag(
                "dynamodb_table",
                "DYNAMODB_TABLE",
                "The base name of the main DynamoDB table",
                "TABLE",
            )
            .default_value(dynamodb_schema::MAIN_TABLE),
        )
        .arg(flag(
            "dynamodb_endpoint",
            "DYNAMODB_ENDPOINT",
            "Custom DynamoDB endpoint, eg. http://localhost:8000 for DynamoDB Local",
            "URL",
        ))
        .arg(
            flag(
                "store_timeout_ms",
                "STORE_TIMEOUT_MS",
                "Deadline for each DynamoDB call",
                "MILLIS",
            )
            .default_value("5000"),
        )
        .arg(
            flag(
                "opensearch_endpoint",
                "OPENSEARCH_ENDPOINT",
                "The OpenSearch cluster holding the feed index",
                "URL",
            )
            .default_value("http://localhost:9200"),
        )
        .arg(
            flag(
                "opensearch_feed_index",
                "OPENSEARCH_FEED_INDEX",
                "The name of the feed index",
                "INDEX",
            )
            .default_value("artistpage-feed"),
        )
        .arg(
            flag(
                "search_timeout_ms",
                "SEARCH_TIMEOUT_MS",
                "Deadline for each OpenSearch call",
                "MILLIS",
            )
            .default_value("5000"),
        )
        .arg(
            flag(
                "jwt_private_key_path",
                "JWT_PRIVATE_KEY_PATH",
                "PEM file with the RSA key that signs session tokens",
                "PATH",
            )
            .required(true),
        )
        .arg(
            flag(
                "jwt_public_key_path",
                "JWT_PUBLIC_KEY_PATH",
                "PEM file with the RSA public key that verifies session tokens",
                "PATH",
            )
            .required(true),
        )
        .arg(
            flag(
                "cookie_secure",
                "COOKIE_SECURE",
                "Whether cookies carry the Secure attribute",
                "BOOL",
            )
            .default_value("true"),
        )
        .arg(
            flag(
                "cognito_user_pool_id",
                "COGNITO_USER_POOL_ID",
                "The Cognito user pool",
                "ID",
            )
            .required(true),
        )
        .arg(
            flag(
                "cognito_client_id",
                "COGNITO_CLIENT_ID",
                "The Cognito app client",
                "ID",
            )
            .required(true),
        )
        .arg(flag(
            "cognito_client_secret",
            "COGNITO_CLIENT_SECRET",
            "The Cognito app client secret, if the client has one",
            "SECRET",
        ))
        .arg(flag(
            "cognito_hosted_ui_domain",
            "COGNITO_HOSTED_UI_DOMAIN",
            "The Cognito hosted UI, eg. https://myapp.auth.us-east-1.amazoncognito.com",
            "URL",
        ))
        .arg(flag(
            "cognito_callback_url",
            "COGNITO_CALLBACK_URL",
            "Our /v1/auth/callback URL as registered with the hosted UI",
            "URL",
        ))
        .arg(flag(
            "frontend_redirect_uri",
            "FRONTEND_REDIRECT_URI",
            "Where federated login sends the browser when it is done",
            "URL",
        ))
        .arg(flag(
            "oauth_state_secret",
            "OAUTH_STATE_SECRET",
            "HMAC key for the OAuth state and link cookies",
            "SECRET",
        ))
        .arg(
            flag("log_level", "LOG_LEVEL", "error, warn, info, debug or trace", "LEVEL")
                .default_value("info"),
        )
        .get_matches();

    Config {
        http_port: value_t!(matches, "http_port", u16).unwrap_or_else(|e| e.exit()),
        aws_region: required(&matches, "aws_region"),
        dynamodb_env: required(&matches, "dynamodb_env"),
        dynamodb_table: required(&matches, "dynamodb_table"),
        dynamodb_endpoint: optional(&matches, "dynamodb_endpoint"),
        store_timeout_ms: value_t!(matches, "store_timeout_ms", u64)
            .unwrap_or_else(|e| e.exit()),
        opensearch_endpoint: required(&matches, "opensearch_endpoint"),
        opensearch_feed_index: required(&matches, "opensearch_feed_index"),
        search_timeout_ms: value_t!(matches, "search_timeout_ms", u64)
            .unwrap_or_else(|e| e.exit()),
        jwt_private_key_path: required(&matches, "jwt_private_key_path"),
        jwt_public_key_path: required(&matches, "jwt_public_key_path"),
        cookie_secure: value_t!(matches, "cookie_secure", bool).unwrap_or_else(|e| e.exit()),
        cognito_user_pool_id: required(&matches, "cognito_user_pool_id"),
        cognito_client_id: required(&matches, "cognito_client_id"),
        cognito_client_secret: optional(&matches, "cognito_client_secret"),
        cognito_hosted_ui_domain: optional(&matches, "cognito_hosted_ui_domain"),
        cognito_callback_url: optional(&matches, "cognito_callback_url"),
        frontend_redirect_uri: optional(&matches, "frontend_redirect_uri"),
        oauth_state_secret: optional(&matches, "oauth_state_secret"),
        log_level: value_t!(matches, "log_level", log::LevelFilter).unwrap_or_else(|e| e.exit()),
    }
}
