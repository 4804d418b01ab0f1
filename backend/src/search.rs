//! The feed index: one small document per post, used only to find which posts belong in a user's
//! feed and in what order. Full posts are always read from the store.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::error::AppError;

/// Max attempts for a request that fails before getting an HTTP response.
const SEND_ATTEMPTS: u64 = 3;

pub const BODY_EXCERPT_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedDoc {
    pub post_id: String,
    pub artist_handle: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_excerpt: String,
    pub explicit: bool,
}

impl FeedDoc {
    /// Index document id. Upserts by the same post overwrite each other.
    pub fn id(&self) -> String {
        doc_id(&self.artist_handle, &self.post_id)
    }
}

/// A reference to a post, as returned by a feed search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedHit {
    pub post_id: String,
    pub artist_handle: String,
    pub created_at: String,
    #[serde(default)]
    pub explicit: bool,
}

pub fn doc_id(handle: &str, post_id: &str) -> String {
    format!("{}#{}", handle, post_id)
}

/// First `BODY_EXCERPT_CHARS` characters of a post body.
pub fn body_excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(String),

    #[error("search returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid search document: {0}")]
    InvalidDocument(String),
}

impl From<SearchError> for AppError {
    fn from(e: SearchError) -> Self {
        AppError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait FeedIndex: Send + Sync {
    /// Create the index and its mappings if it does not exist yet.
    async fn ensure_index(&self) -> Result<(), SearchError>;

    /// Insert or replace a post's document. Returns once the document is searchable.
    async fn index_post(&self, doc: &FeedDoc) -> Result<(), SearchError>;

    /// Remove a post's document. Removing a missing document succeeds.
    async fn delete_post(&self, handle: &str, post_id: &str) -> Result<(), SearchError>;

    /// Posts by any of `handles`, newest first, skipping `from` and returning at most `size`.
    async fn search_feed(
        &self,
        handles: &[String],
        size: usize,
        from: usize,
    ) -> Result<Vec<FeedHit>, SearchError>;
}

/// `FeedIndex` backed by an OpenSearch (or Elasticsearch) cluster over its REST API.
pub struct OpenSearchIndex {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl OpenSearchIndex {
    pub fn new(endpoint: &str, index: &str, timeout: Duration) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    fn doc_url(&self, handle: &str, post_id: &str) -> String {
        // Handles and slugs are [a-z0-9-], so '#' is the only character needing escape.
        format!(
            "{}/_doc/{}",
            self.index_url(),
            doc_id(handle, post_id).replace('#', "%23")
        )
    }

    /// Send a request, retrying with a short backoff when no HTTP response came back at all
    /// (connection refused, timeout). Error statuses are returned to the caller as is.
    async fn send<F>(&self, build: F) -> Result<reqwest::Response, SearchError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;
        for attempt in 0..SEND_ATTEMPTS {
            if attempt > 0 {
                tokio::time::delay_for(Duration::from_millis(attempt * 100)).await;
            }
            // `send` only fails below the HTTP layer.
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log::debug!("search request attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }
        Err(SearchError::Transport(
            last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string()),
        ))
    }
}

async fn status_error(response: reqwest::Response) -> SearchError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SearchError::Status { status, body }
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: FeedHit,
}

/// Request body for a feed search.
fn feed_query(handles: &[String], size: usize, from: usize) -> serde_json::Value {
    let query = if handles.is_empty() {
        json!({ "match_none": {} })
    } else {
        json!({ "terms": { "artist_handle": handles } })
    };
    json!({
        "query": query,
        "sort": [{ "created_at": { "order": "desc" } }],
        "size": size,
        "from": from,
        "track_total_hits": true,
        "_source": ["post_id", "artist_handle", "created_at", "explicit"],
    })
}

fn index_mappings() -> serde_json::Value {
    json!({
        "mappings": {
            "properties": {
                "post_id": { "type": "keyword" },
                "artist_handle": { "type": "keyword" },
                "created_at": { "type": "date" },
                "body_excerpt": { "type": "text" },
                "explicit": { "type": "boolean" },
            }
        }
    })
}

#[async_trait]
impl FeedIndex for OpenSearchIndex {
    async fn ensure_index(&self) -> Result<(), SearchError> {
        let url = self.index_url();
        let response = self.send(|| self.client.head(url.as_str())).await?;
        if response.status().is_success() {
            return Ok(());
        }
        let mappings = index_mappings();
        let response = self.send(|| self.client.put(url.as_str()).json(&mappings)).await?;
        // 400 is "resource_already_exists_exception" when another instance won the race.
        if response.status().is_success() || response.status().as_u16() == 400 {
            log::info!("Feed index {} is ready", self.index);
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn index_post(&self, doc: &FeedDoc) -> Result<(), SearchError> {
        if doc.post_id.is_empty() || doc.artist_handle.is_empty() {
            return Err(SearchError::InvalidDocument(
                "post_id and artist_handle required".to_string(),
            ));
        }
        let url = format!(
            "{}?refresh=wait_for",
            self.doc_url(&doc.artist_handle, &doc.post_id)
        );
        let response = self.send(|| self.client.put(url.as_str()).json(doc)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn delete_post(&self, handle: &str, post_id: &str) -> Result<(), SearchError> {
        if handle.is_empty() || post_id.is_empty() {
            return Err(SearchError::InvalidDocument(
                "artist_handle and post_id required".to_string(),
            ));
        }
        let url = self.doc_url(handle, post_id);
        let response = self.send(|| self.client.delete(url.as_str())).await?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn search_feed(
        &self,
        handles: &[String],
        size: usize,
        from: usize,
    ) -> Result<Vec<FeedHit>, SearchError> {
        let url = format!("{}/_search", self.index_url());
        let body = feed_query(handles, size, from);
        let response = self.send(|| self.client.post(url.as_str()).json(&body)).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        Ok(parsed.hits.hits.into_iter().map(|hit| hit.source).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_query() {
        let handles = vec!["abcd".to_string(), "wxyz".to_string()];
        let query = feed_query(&handles, 11, 20);
        assert_eq!(query["query"]["terms"]["artist_handle"][1], "wxyz");
        assert_eq!(query["sort"][0]["created_at"]["order"], "desc");
        assert_eq!(query["size"], 11);
        assert_eq!(query["from"], 20);

        let query = feed_query(&[], 10, 0);
        assert!(query["query"]["match_none"].is_object());
    }

    #[test]
    fn test_doc_url_escapes_id() {
        let index =
            OpenSearchIndex::new("http://localhost:9200/", "feed", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            index.doc_url("abcd", "hello-world"),
            "http://localhost:9200/feed/_doc/abcd%23hello-world"
        );
    }

    #[test]
    fn test_body_excerpt_counts_chars() {
        let body = "é".repeat(300);
        let excerpt = body_excerpt(&body);
        assert_eq!(excerpt.chars().count(), BODY_EXCERPT_CHARS);
        assert_eq!(body_excerpt("short"), "short");
    }

    #[test]
    fn test_parse_search_response() {
        let raw = r#"{
            "took": 3,
            "hits": {
                "total": { "value": 1, "relation": "eq" },
                "hits": [{
                    "_id": "abcd#hello",
                    "_source": {
                        "post_id": "hello",
                        "artist_handle": "abcd",
                        "created_at": "2024-01-01T00:00:00.000Z"
                    }
                }]
            }
        }"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.hits.hits[0].source,
            FeedHit {
                post_id: "hello".to_string(),
                artist_handle: "abcd".to_string(),
                created_at: "2024-01-01T00:00:00.000Z".to_string(),
                explicit: false,
            }
        );
    }
}
