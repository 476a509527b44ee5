//! The final research report returned to the caller.

use serde::{Deserialize, Serialize};

use crate::session::{Finding, SessionSnapshot};

/// The finished product of a research run: the composed text plus enough
/// metadata to judge how complete the evidence behind it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    /// The original user question.
    pub query: String,
    /// The writer's composed report text.
    pub content: String,
    /// Distinct source URLs backing the findings, in first-seen order.
    pub sources: Vec<String>,
    pub failed_searches: usize,
    pub total_searches: usize,
    /// The final session state, kept for audit and display.
    pub session: SessionSnapshot,
}

impl ResearchReport {
    pub fn new(
        query: impl Into<String>,
        content: impl Into<String>,
        findings: &[Finding],
        failed_searches: usize,
        total_searches: usize,
        session: SessionSnapshot,
    ) -> Self {
        let mut sources: Vec<String> = Vec::new();
        for finding in findings {
            if !sources.contains(&finding.url) {
                sources.push(finding.url.clone());
            }
        }
        Self {
            query: query.into(),
            content: content.into(),
            sources,
            failed_searches,
            total_searches,
            session,
        }
    }

    /// A caveat for partially failed runs, absent when every search landed.
    pub fn failure_note(&self) -> Option<String> {
        if self.failed_searches == 0 {
            return None;
        }
        Some(format!(
            "Note: {} of {} searches failed; coverage may be incomplete.",
            self.failed_searches, self.total_searches
        ))
    }

    /// The report text with the failure caveat appended when applicable.
    pub fn render(&self) -> String {
        match self.failure_note() {
            Some(note) => format!("{}\n\n{}", self.content, note),
            None => self.content.clone(),
        }
    }
}
