//! External capability boundaries.
//!
//! Everything that is really a call to a generative model or a hosted search
//! service lives behind one of these traits: the pipeline only depends on the
//! narrow contracts here, never on how the text is produced. Implementations
//! ship in [`crate::heuristics`] (LLM-free defaults) and
//! [`crate::providers`] (hosted search).

use async_trait::async_trait;
use futures::Stream;
use futures::stream;
use std::pin::Pin;

use crate::error::{CapabilityError, SearchFailure};
use crate::session::{Finding, RawResult, SearchHit};

/// A finite, non-restartable stream of report chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, CapabilityError>> + Send>>;

/// Decomposes a research question and rephrases failed sub-queries.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Break the user's question into specific, searchable sub-queries.
    /// Empty or malformed output is a `CapabilityError`.
    async fn decompose(&self, query: &str) -> Result<Vec<String>, CapabilityError>;

    /// Suggest a different angle for a sub-query whose last attempt failed.
    /// Anchored to the original question so rephrasings don't drift off-topic.
    async fn rephrase(
        &self,
        original_query: &str,
        failed_query: &str,
        reason: &SearchFailure,
    ) -> Result<String, CapabilityError>;
}

/// Executes one logical web search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch scored hits for a query. Fails with `TransientNetwork` for
    /// network-level trouble or `Capability` for a broken response.
    async fn fetch(&self, query: &str) -> Result<Vec<SearchHit>, SearchFailure>;
}

/// Judges raw results against the original question.
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Filter and rank all collected results. Returned findings are sorted
    /// score-descending, each with a one-line acceptance reasoning. Zero
    /// findings is a legal outcome, not an error.
    async fn judge(
        &self,
        query: &str,
        raw_results: &[RawResult],
    ) -> Result<Vec<Finding>, CapabilityError>;
}

/// Composes the final report.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Produce the full report text at once. Must produce something readable
    /// even for zero findings (an explicit insufficient-evidence fallback).
    async fn compose(&self, query: &str, findings: &[Finding])
    -> Result<String, CapabilityError>;

    /// Produce the report as a lazy chunk sequence for incremental delivery.
    /// Default: the composed text as a single chunk.
    async fn compose_stream(
        &self,
        query: &str,
        findings: &[Finding],
    ) -> Result<ChunkStream, CapabilityError> {
        let text = self.compose(query, findings).await?;
        Ok(Box::pin(stream::iter(vec![Ok(text)])))
    }
}

/// Two-tier score pre-filter over successful result groups, flattened to
/// `(sub_query_index, hit)` pairs. The fallback tier applies only when the
/// strict tier yields nothing; there is no third tier.
pub fn prefilter_hits(
    raw_results: &[RawResult],
    strict_threshold: f64,
    fallback_threshold: f64,
) -> Vec<(usize, SearchHit)> {
    let all: Vec<(usize, &SearchHit)> = raw_results
        .iter()
        .filter(|g| g.succeeded)
        .flat_map(|g| g.hits.iter().map(|h| (g.sub_query_index, h)))
        .collect();

    let tier = |threshold: f64| -> Vec<(usize, SearchHit)> {
        all.iter()
            .filter(|(_, h)| h.relevance_score >= threshold)
            .map(|(i, h)| (*i, (*h).clone()))
            .collect()
    };

    let strict = tier(strict_threshold);
    if !strict.is_empty() {
        return strict;
    }
    tier(fallback_threshold)
}
