//! LLM-free default capabilities.
//!
//! These keep the pipeline fully usable without any generative model: a
//! rule-based planner, a score-threshold analyst, and a template writer.
//! They are deliberately deterministic so runs are reproducible and the
//! orchestration logic stays testable without network access.

use async_trait::async_trait;
use futures::stream;
use tracing::debug;

use crate::capability::{Analyst, ChunkStream, Planner, Writer, prefilter_hits};
use crate::error::{CapabilityError, SearchFailure};
use crate::session::{Finding, RawResult};

/// Alternate angles appended when rephrasing. The first suffix not already
/// present in the failed query is chosen, so repeated rephrases of the same
/// sub-query keep moving instead of looping.
const REPHRASE_ANGLES: [&str; 3] = ["key facts", "explained", "recent developments"];

/// Rule-based question decomposition.
///
/// Comparative questions split on their comparison marker; "how" questions
/// get an extra practical-steps angle; everything else gets an overview plus
/// a recent-developments angle.
#[derive(Debug, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn new() -> Self {
        Self
    }
}

const COMPARISON_MARKERS: [&str; 3] = [" vs ", " versus ", " compared to "];

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn decompose(&self, query: &str) -> Result<Vec<String>, CapabilityError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CapabilityError::EmptyOutput {
                capability: "planner",
            });
        }

        let lower = query.to_lowercase();
        let mut sub_queries = Vec::new();

        if let Some((marker, idx)) = COMPARISON_MARKERS
            .iter()
            .find_map(|m| lower.find(m).map(|i| (*m, i)))
        {
            let end = idx + marker.len();
            // Lowercasing can shift byte offsets for non-ASCII text; only
            // split when the offsets still land on boundaries of the original.
            if query.is_char_boundary(idx) && query.is_char_boundary(end) {
                let left = query[..idx].trim();
                let right = query[end..].trim();
                if !left.is_empty() && !right.is_empty() {
                    sub_queries.push(format!("{left} overview"));
                    sub_queries.push(format!("{right} overview"));
                    sub_queries.push(format!("{left} compared to {right}"));
                }
            }
        }

        if sub_queries.is_empty() {
            sub_queries.push(format!("{query} overview"));
            sub_queries.push(format!("{query} recent developments"));
            if lower.starts_with("how ") {
                sub_queries.push(format!("{query} practical steps"));
            }
        }

        sub_queries.truncate(4);
        debug!(count = sub_queries.len(), "decomposed question");
        Ok(sub_queries)
    }

    async fn rephrase(
        &self,
        original_query: &str,
        failed_query: &str,
        reason: &SearchFailure,
    ) -> Result<String, CapabilityError> {
        debug!(failed_query, %reason, "rephrasing failed sub-query");
        // Anchor to the original question rather than mutating the failed
        // text further; rephrases of rephrases drift off-topic otherwise.
        let base = original_query.trim();
        for angle in REPHRASE_ANGLES {
            let candidate = format!("{base} {angle}");
            if candidate != failed_query {
                return Ok(candidate);
            }
        }
        Ok(format!("{base} background"))
    }
}

/// Two-tier score-threshold analyst. Accepts hits at or above the strict
/// threshold; when that yields nothing, retries once at the fallback
/// threshold. Findings come back sorted score-descending.
#[derive(Debug)]
pub struct ScoreAnalyst {
    strict_threshold: f64,
    fallback_threshold: f64,
}

impl ScoreAnalyst {
    pub fn new(strict_threshold: f64, fallback_threshold: f64) -> Self {
        Self {
            strict_threshold,
            fallback_threshold,
        }
    }
}

#[async_trait]
impl Analyst for ScoreAnalyst {
    async fn judge(
        &self,
        _query: &str,
        raw_results: &[RawResult],
    ) -> Result<Vec<Finding>, CapabilityError> {
        let kept = prefilter_hits(raw_results, self.strict_threshold, self.fallback_threshold);
        let threshold = if kept
            .iter()
            .all(|(_, h)| h.relevance_score >= self.strict_threshold)
            && !kept.is_empty()
        {
            self.strict_threshold
        } else {
            self.fallback_threshold
        };

        let mut findings: Vec<Finding> = kept
            .into_iter()
            .map(|(index, hit)| Finding {
                title: hit.title,
                url: hit.url,
                snippet: hit.snippet,
                relevance_score: hit.relevance_score,
                why_relevant: format!(
                    "relevance score {:.2} meets the {:.2} threshold",
                    hit.relevance_score, threshold
                ),
                sub_query_index: index,
            })
            .collect();
        findings.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(findings = findings.len(), "analyst accepted findings");
        Ok(findings)
    }
}

/// Markdown template writer. Produces a titled report with one section per
/// finding, or an explicit insufficient-evidence notice for zero findings.
#[derive(Debug, Default)]
pub struct TemplateWriter;

impl TemplateWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Writer for TemplateWriter {
    async fn compose(
        &self,
        query: &str,
        findings: &[Finding],
    ) -> Result<String, CapabilityError> {
        if findings.is_empty() {
            return Ok(format!(
                "# Research Report: {query}\n\n\
                 No sufficiently relevant sources were found for this question. \
                 Try rewording it or broadening its scope.\n"
            ));
        }

        let mut report = format!("# Research Report: {query}\n\n");
        report.push_str(&format!(
            "Based on {} relevant source{}.\n\n",
            findings.len(),
            if findings.len() == 1 { "" } else { "s" }
        ));
        for finding in findings {
            report.push_str(&format!(
                "## {}\n\n{}\n\n*Source: <{}> ({})*\n\n",
                finding.title, finding.snippet, finding.url, finding.why_relevant
            ));
        }
        Ok(report.trim_end().to_string() + "\n")
    }

    async fn compose_stream(
        &self,
        query: &str,
        findings: &[Finding],
    ) -> Result<ChunkStream, CapabilityError> {
        let text = self.compose(query, findings).await?;
        // One chunk per paragraph, separators included, so concatenating the
        // chunks reproduces the composed text exactly.
        let chunks: Vec<Result<String, CapabilityError>> = text
            .split_inclusive("\n\n")
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SearchHit;
    use futures::StreamExt;

    fn group(index: usize, scores: &[f64]) -> RawResult {
        RawResult {
            sub_query_index: index,
            query: format!("q{index}"),
            hits: scores
                .iter()
                .map(|s| SearchHit {
                    title: format!("title {s}"),
                    url: format!("https://example.com/{s}"),
                    snippet: format!("snippet {s}"),
                    relevance_score: *s,
                })
                .collect(),
            attempts: 1,
            succeeded: true,
        }
    }

    #[tokio::test]
    async fn test_decompose_plain_question() {
        let planner = HeuristicPlanner::new();
        let subs = planner.decompose("AI agents in 2024").await.unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs[0].contains("overview"));
        assert!(subs[1].contains("recent developments"));
    }

    #[tokio::test]
    async fn test_decompose_comparative_question() {
        let planner = HeuristicPlanner::new();
        let subs = planner.decompose("Rust vs Go for services").await.unwrap();
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0], "Rust overview");
        assert!(subs[2].contains("compared to"));
    }

    #[tokio::test]
    async fn test_decompose_how_question() {
        let planner = HeuristicPlanner::new();
        let subs = planner.decompose("How does raft work").await.unwrap();
        assert_eq!(subs.len(), 3);
        assert!(subs[2].contains("practical steps"));
    }

    #[tokio::test]
    async fn test_decompose_rejects_blank() {
        let planner = HeuristicPlanner::new();
        let err = planner.decompose("   ").await.unwrap_err();
        assert!(matches!(err, CapabilityError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn test_rephrase_anchors_to_original_and_advances() {
        let planner = HeuristicPlanner::new();
        let reason = SearchFailure::LowRelevance {
            average: 0.1,
            threshold: 0.5,
        };

        let first = planner
            .rephrase("AI agents", "AI agents overview", &reason)
            .await
            .unwrap();
        assert_eq!(first, "AI agents key facts");

        // Rephrasing the rephrase moves to the next angle instead of looping.
        let second = planner.rephrase("AI agents", &first, &reason).await.unwrap();
        assert_eq!(second, "AI agents explained");
    }

    #[tokio::test]
    async fn test_analyst_strict_tier() {
        let analyst = ScoreAnalyst::new(0.5, 0.3);
        let raw = vec![group(0, &[0.9, 0.4]), group(1, &[0.6])];
        let findings = analyst.judge("q", &raw).await.unwrap();
        assert_eq!(findings.len(), 2);
        // Sorted score-descending.
        assert!(findings[0].relevance_score >= findings[1].relevance_score);
        assert!(findings[0].why_relevant.contains("0.50 threshold"));
    }

    #[tokio::test]
    async fn test_analyst_fallback_tier() {
        let analyst = ScoreAnalyst::new(0.5, 0.3);
        let raw = vec![group(0, &[0.4, 0.2])];
        let findings = analyst.judge("q", &raw).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].why_relevant.contains("0.30 threshold"));
    }

    #[tokio::test]
    async fn test_analyst_zero_findings_is_ok() {
        let analyst = ScoreAnalyst::new(0.5, 0.3);
        let raw = vec![group(0, &[0.1])];
        let findings = analyst.judge("q", &raw).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_writer_with_findings() {
        let writer = TemplateWriter::new();
        let finding = Finding {
            title: "Some Source".into(),
            url: "https://example.com/a".into(),
            snippet: "the evidence".into(),
            relevance_score: 0.8,
            why_relevant: "relevance score 0.80 meets the 0.50 threshold".into(),
            sub_query_index: 0,
        };
        let report = writer.compose("my question", &[finding]).await.unwrap();
        assert!(report.starts_with("# Research Report: my question"));
        assert!(report.contains("## Some Source"));
        assert!(report.contains("https://example.com/a"));
    }

    #[tokio::test]
    async fn test_writer_insufficient_evidence_fallback() {
        let writer = TemplateWriter::new();
        let report = writer.compose("my question", &[]).await.unwrap();
        assert!(report.contains("No sufficiently relevant sources"));
    }

    #[tokio::test]
    async fn test_stream_concatenates_to_composed_text() {
        let writer = TemplateWriter::new();
        let finding = Finding {
            title: "T".into(),
            url: "https://example.com/a".into(),
            snippet: "s".into(),
            relevance_score: 0.8,
            why_relevant: "r".into(),
            sub_query_index: 0,
        };
        let composed = writer.compose("q", &[finding.clone()]).await.unwrap();

        let mut stream = writer.compose_stream("q", &[finding]).await.unwrap();
        let mut collected = String::new();
        let mut chunks = 0;
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
            chunks += 1;
        }
        assert_eq!(collected, composed);
        assert!(chunks > 1);
    }
}
