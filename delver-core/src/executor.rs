//! Search executor — one logical search: cache lookup, external fetch,
//! scoring, cache write.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::SearchCache;
use crate::capability::SearchProvider;
use crate::error::SearchFailure;
use crate::session::SearchHit;

/// The outcome of one successful search.
#[derive(Debug, Clone)]
pub struct ResultBundle {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub average_relevance: f64,
    pub from_cache: bool,
}

/// Executes single searches against the provider, consulting the cache first
/// and writing useful bundles back with the configured TTL.
pub struct SearchExecutor {
    provider: Arc<dyn SearchProvider>,
    cache: Arc<SearchCache>,
    relevance_threshold: f64,
}

/// Mean provider relevance over a hit set; 0.0 for an empty set.
pub fn average_relevance(hits: &[SearchHit]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    hits.iter().map(|h| h.relevance_score).sum::<f64>() / hits.len() as f64
}

impl SearchExecutor {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        cache: Arc<SearchCache>,
        relevance_threshold: f64,
    ) -> Self {
        Self {
            provider,
            cache,
            relevance_threshold,
        }
    }

    /// Run one logical search. A cache hit short-circuits the external call
    /// entirely; only useful bundles (average relevance at or above the
    /// threshold) are cached, so a hit is always a success.
    pub async fn execute(&self, query: &str) -> Result<ResultBundle, SearchFailure> {
        if let Some(hits) = self.cache.get(query) {
            let average_relevance = average_relevance(&hits);
            info!(query, hits = hits.len(), "search served from cache");
            return Ok(ResultBundle {
                query: query.to_string(),
                hits,
                average_relevance,
                from_cache: true,
            });
        }

        debug!(query, "cache miss, fetching");
        let hits = self.provider.fetch(query).await?;
        let average = average_relevance(&hits);

        if average < self.relevance_threshold {
            return Err(SearchFailure::LowRelevance {
                average,
                threshold: self.relevance_threshold,
            });
        }

        // A failed cache write costs a future fetch, nothing more; it must
        // not fail a search that already has good results in hand.
        if let Err(e) = self.cache.set(query, &hits) {
            warn!(query, error = %e, "cache write failed");
        }

        info!(query, hits = hits.len(), average, "search succeeded");
        Ok(ResultBundle {
            query: query.to_string(),
            hits,
            average_relevance: average,
            from_cache: false,
        })
    }
}
