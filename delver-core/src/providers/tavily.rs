//! Tavily search API client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::capability::SearchProvider;
use crate::error::SearchFailure;
use crate::session::SearchHit;

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Snippets are truncated to this many characters before storage; the
/// analyst never needs full page content.
const SNIPPET_MAX_CHARS: usize = 500;

/// Search provider backed by the Tavily API.
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    max_results: usize,
}

impl TavilySearch {
    /// Build a client with the given per-request timeout.
    pub fn new(
        api_key: impl Into<String>,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            max_results,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn fetch(&self, query: &str) -> Result<Vec<SearchHit>, SearchFailure> {
        let payload = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": self.max_results,
            "search_depth": "advanced",
            "include_answer": false,
        });

        let response = self
            .client
            .post(TAVILY_URL)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // Timeouts and connection trouble are worth retrying; both
                // surface here as send errors.
                SearchFailure::TransientNetwork {
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchFailure::TransientNetwork {
                message: format!("server returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(SearchFailure::Capability {
                message: format!("server returned {status}"),
            });
        }

        let body: TavilyResponse =
            response.json().await.map_err(|e| SearchFailure::Capability {
                message: format!("unparseable response: {e}"),
            })?;

        debug!(query, results = body.results.len(), "tavily response");
        Ok(body
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.content.chars().take(SNIPPET_MAX_CHARS).collect(),
                relevance_score: r.score.clamp(0.0, 1.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "results": [
                {"title": "T", "url": "https://a.example", "content": "c", "score": 0.72},
                {"url": "https://b.example"}
            ],
            "response_time": 1.2
        }"#;
        let parsed: TavilyResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert!((parsed.results[0].score - 0.72).abs() < 1e-9);
        // Missing fields default rather than failing the whole response.
        assert_eq!(parsed.results[1].title, "");
        assert_eq!(parsed.results[1].score, 0.0);
    }

    #[test]
    fn test_snippet_truncation() {
        let long = "x".repeat(2_000);
        let snippet: String = long.chars().take(SNIPPET_MAX_CHARS).collect();
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS);
    }
}
