use std::collections::HashMap;
use std::str::FromStr;

use rusoto_dynamodb::{AttributeValue, DynamoDbClient};

pub mod store;

pub use store::DynamoStore;

/// In production and staging, DynamoDB table names have a prefix, namely "staging-" and
/// "production-". Locally, the prefix is "local-", to match the `dynamodb_schema` tool.
pub fn table_name(env: &str, base_table_name: &str) -> String {
    format!("{}-{}", env, base_table_name)
}

/// Create a client for the given region. When `endpoint` is present, eg. for DynamoDB Local, the
/// client talks to that endpoint instead.
pub fn create_dynamodb_client(
    region_name: &str,
    endpoint: Option<&str>,
) -> anyhow::Result<DynamoDbClient> {
    let request_dispatcher = rusoto_core::request::HttpClient::new()?;
    let credentials_provider = rusoto_credential::DefaultCredentialsProvider::new()?;
    let region = match endpoint {
        Some(endpoint) => rusoto_core::Region::Custom {
            name: region_name.to_string(),
            endpoint: endpoint.to_string(),
        },
        None => region_name.parse::<rusoto_core::Region>()?,
    };
    Ok(DynamoDbClient::new_with(
        request_dispatcher,
        credentials_provider,
        region,
    ))
}

/// Shorthand to create `AttributeValue` with string type `S`.
pub fn s_val(value: &str) -> AttributeValue {
    AttributeValue {
        s: Some(value.to_string()),
        ..Default::default()
    }
}

/// Shorthand to create `AttributeValue` with number type `N`.
pub fn n_val<N: ToString>(value: N) -> AttributeValue {
    AttributeValue {
        n: Some(value.to_string()),
        ..Default::default()
    }
}

pub fn bool_val(value: bool) -> AttributeValue {
    AttributeValue {
        bool: Some(value),
        ..Default::default()
    }
}

/// A list `L` of `S` values. We use lists rather than string sets because string sets cannot be
/// empty and do not keep order.
pub fn string_list_val(values: &[String]) -> AttributeValue {
    AttributeValue {
        l: Some(values.iter().map(|v| s_val(v)).collect()),
        ..Default::default()
    }
}

/// Shorthand to create `AttributeValue` entry with string type `S`.
pub fn av_s(key: &str, value: &str) -> (String, AttributeValue) {
    (key.to_string(), s_val(value))
}

/// Shorthand to create `AttributeValue` entry with number type `N`.
pub fn av_n<N: ToString>(key: &str, value: N) -> (String, AttributeValue) {
    (key.to_string(), n_val(value))
}

pub fn av_bool(key: &str, value: bool) -> (String, AttributeValue) {
    (key.to_string(), bool_val(value))
}

pub fn av_string_list(key: &str, values: &[String]) -> (String, AttributeValue) {
    (key.to_string(), string_list_val(values))
}

/// Shorthand. Turn an array of `AttributeValue` entries into a hash map.
///
/// eg.
/// ```
/// let key = av_map(&[
///     av_s("pk", "ARTISTS#abcd"),
///     av_s("sk", "ARTIST"),
/// ]);
/// ```
pub fn av_map(arr: &[(String, AttributeValue)]) -> HashMap<String, AttributeValue> {
    arr.iter().cloned().collect()
}

/// Shorthand. Retrieve the `S` string value for a given key in a Dynamo item.
pub fn av_get_s<'a>(item: &'a HashMap<String, AttributeValue>, key: &str) -> Option<&'a str> {
    Some(item.get(key)?.s.as_ref()?.as_str())
}

/// Shorthand. Retrieve the `N` value for a given key in a Dynamo item, and parse it.
pub fn av_get_n<T: FromStr>(item: &HashMap<String, AttributeValue>, key: &str) -> Option<T> {
    item.get(key)?.n.as_ref()?.parse::<T>().ok()
}

pub fn av_get_bool(item: &HashMap<String, AttributeValue>, key: &str) -> Option<bool> {
    item.get(key)?.bool
}

pub fn av_get_string_list(
    item: &HashMap<String, AttributeValue>,
    key: &str,
) -> Option<Vec<String>> {
    let list = item.get(key)?.l.as_ref()?;
    Some(list.iter().filter_map(|v| v.s.clone()).collect())
}

/// Like `av_get_s`, but owned and defaulting to the empty string.
pub fn av_string(item: &HashMap<String, AttributeValue>, key: &str) -> String {
    av_get_s(item, key).unwrap_or_default().to_string()
}
