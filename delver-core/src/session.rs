//! The shared research session — the whiteboard every stage reads and writes.
//!
//! A single `Session` exists per research run, owned by the orchestrator and
//! shared with the concurrent search tasks. All mutation goes through methods
//! that serialize writers behind one mutex; no raw field access is exposed,
//! so concurrent appends can never interleave and write-once fields can never
//! be silently overwritten. The lock is held only for short, non-suspending
//! critical sections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::StateError;

/// The four pipeline stages, in fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planner,
    Researchers,
    Analyst,
    Writer,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 4] = [
        Stage::Planner,
        Stage::Researchers,
        Stage::Analyst,
        Stage::Writer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Planner => "planner",
            Stage::Researchers => "researchers",
            Stage::Analyst => "analyst",
            Stage::Writer => "writer",
        }
    }

    fn index(self) -> usize {
        match self {
            Stage::Planner => 0,
            Stage::Researchers => 1,
            Stage::Analyst => 2,
            Stage::Writer => 3,
        }
    }
}

/// Status of one pipeline stage. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl AgentStatus {
    pub fn name(self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Done => "done",
            AgentStatus::Failed => "failed",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Done | AgentStatus::Failed)
    }
}

/// One hit returned by the search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    /// Truncated summary text; the analyst processes it further.
    pub snippet: String,
    /// Provider-scored relevance, 0.0-1.0.
    pub relevance_score: f64,
}

/// The terminal record of one search task, tagged with its originating
/// sub-query index so downstream consumers can reconstruct grouping even
/// though groups arrive in completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResult {
    pub sub_query_index: usize,
    /// The query text actually searched (possibly a rephrasing).
    pub query: String,
    pub hits: Vec<SearchHit>,
    /// Attempts consumed, including the first.
    pub attempts: u32,
    pub succeeded: bool,
}

/// A result accepted by the analyst, with its reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub relevance_score: f64,
    pub why_relevant: String,
    pub sub_query_index: usize,
}

#[derive(Debug)]
struct SessionInner {
    query: String,
    sub_queries: Option<Vec<String>>,
    raw_results: Vec<RawResult>,
    findings: Option<Vec<Finding>>,
    report: Option<String>,
    statuses: [AgentStatus; 4],
    logs: Vec<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

/// The shared whiteboard for one research run.
pub struct Session {
    id: Uuid,
    inner: Mutex<SessionInner>,
}

/// A point-in-time copy of the whole session, used for display and for
/// preserving diagnostics when a run fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub query: String,
    pub sub_queries: Vec<String>,
    pub raw_results: Vec<RawResult>,
    pub findings: Vec<Finding>,
    pub report: Option<String>,
    pub agent_statuses: Vec<(Stage, AgentStatus)>,
    pub logs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Compact per-run summary for user display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub query: String,
    pub sub_query_count: usize,
    pub succeeded_searches: usize,
    pub failed_searches: usize,
    pub findings_count: usize,
    pub has_report: bool,
    pub duration_secs: f64,
}

impl Session {
    /// Create a fresh session for the given user query.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            inner: Mutex::new(SessionInner {
                query: query.into(),
                sub_queries: None,
                raw_results: Vec::new(),
                findings: None,
                report: None,
                statuses: [AgentStatus::Pending; 4],
                logs: Vec::new(),
                created_at: Utc::now(),
                completed_at: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A poisoned lock means a writer panicked mid-append; the data is still
    /// structurally sound (appends are single operations), so recover.
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn query(&self) -> String {
        self.lock().query.clone()
    }

    /// Record the planner's decomposition. Write-once.
    pub fn set_sub_queries(&self, sub_queries: Vec<String>) -> Result<(), StateError> {
        let mut inner = self.lock();
        if inner.sub_queries.is_some() {
            return Err(StateError::AlreadySet {
                field: "sub_queries",
            });
        }
        inner.sub_queries = Some(sub_queries);
        Ok(())
    }

    pub fn sub_queries(&self) -> Vec<String> {
        self.lock().sub_queries.clone().unwrap_or_default()
    }

    /// Append one terminal search record. Serialized across concurrent tasks.
    pub fn append_raw_results(&self, group: RawResult) {
        self.lock().raw_results.push(group);
    }

    pub fn raw_results(&self) -> Vec<RawResult> {
        self.lock().raw_results.clone()
    }

    /// Append a timestamped audit entry. Entries are never removed.
    pub fn append_log(&self, message: impl AsRef<str>) {
        let entry = format!("[{}] {}", Utc::now().format("%H:%M:%S"), message.as_ref());
        self.lock().logs.push(entry);
    }

    pub fn logs(&self) -> Vec<String> {
        self.lock().logs.clone()
    }

    /// Record the analyst's accepted findings. Write-once, and only after the
    /// researchers stage has completed.
    pub fn set_findings(&self, findings: Vec<Finding>) -> Result<(), StateError> {
        let mut inner = self.lock();
        if inner.findings.is_some() {
            return Err(StateError::AlreadySet { field: "findings" });
        }
        if inner.statuses[Stage::Researchers.index()] != AgentStatus::Done {
            return Err(StateError::OutOfOrder {
                field: "findings",
                required: "researchers",
            });
        }
        inner.findings = Some(findings);
        Ok(())
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.lock().findings.clone().unwrap_or_default()
    }

    /// Record the composed report. Write-once, and only after the analyst
    /// stage has completed.
    pub fn set_report(&self, report: String) -> Result<(), StateError> {
        let mut inner = self.lock();
        if inner.report.is_some() {
            return Err(StateError::AlreadySet { field: "report" });
        }
        if inner.statuses[Stage::Analyst.index()] != AgentStatus::Done {
            return Err(StateError::OutOfOrder {
                field: "report",
                required: "analyst",
            });
        }
        inner.report = Some(report);
        Ok(())
    }

    pub fn report(&self) -> Option<String> {
        self.lock().report.clone()
    }

    /// Transition a stage status. Only the orchestrator calls this, and only
    /// forward: Pending -> Running -> Done | Failed. Starting a stage requires
    /// every earlier stage to have finished successfully.
    pub fn set_status(&self, stage: Stage, status: AgentStatus) -> Result<(), StateError> {
        let mut inner = self.lock();
        let current = inner.statuses[stage.index()];

        let legal = match status {
            AgentStatus::Pending => false,
            AgentStatus::Running => current == AgentStatus::Pending,
            AgentStatus::Done | AgentStatus::Failed => current == AgentStatus::Running,
        };
        if !legal || current.is_terminal() {
            return Err(StateError::StatusRegression {
                stage: stage.name(),
                from: current.name(),
                to: status.name(),
            });
        }

        if status == AgentStatus::Running {
            let blocked = Stage::ORDER[..stage.index()]
                .iter()
                .any(|s| inner.statuses[s.index()] != AgentStatus::Done);
            if blocked {
                return Err(StateError::StageOrder {
                    stage: stage.name(),
                });
            }
        }

        inner.statuses[stage.index()] = status;
        let entry = format!(
            "[{}] {} -> {}",
            Utc::now().format("%H:%M:%S"),
            stage.name(),
            status.name()
        );
        inner.logs.push(entry);
        Ok(())
    }

    pub fn status(&self, stage: Stage) -> AgentStatus {
        self.lock().statuses[stage.index()]
    }

    /// Stamp the session as finished (successfully or not).
    pub fn complete(&self) {
        self.lock().completed_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            id: self.id,
            query: inner.query.clone(),
            sub_queries: inner.sub_queries.clone().unwrap_or_default(),
            raw_results: inner.raw_results.clone(),
            findings: inner.findings.clone().unwrap_or_default(),
            report: inner.report.clone(),
            agent_statuses: Stage::ORDER
                .iter()
                .map(|s| (*s, inner.statuses[s.index()]))
                .collect(),
            logs: inner.logs.clone(),
            created_at: inner.created_at,
            completed_at: inner.completed_at,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = self.lock();
        let succeeded = inner.raw_results.iter().filter(|g| g.succeeded).count();
        let failed = inner.raw_results.len() - succeeded;
        let duration_secs = inner
            .completed_at
            .map(|end| (end - inner.created_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        SessionSummary {
            query: inner.query.clone(),
            sub_query_count: inner.sub_queries.as_ref().map_or(0, Vec::len),
            succeeded_searches: succeeded,
            failed_searches: failed,
            findings_count: inner.findings.as_ref().map_or(0, Vec::len),
            has_report: inner.report.is_some(),
            duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn walk_to(session: &Session, stage: Stage) {
        // Drive all stages before `stage` to Done, and `stage` to Running.
        for s in Stage::ORDER {
            if s == stage {
                session.set_status(s, AgentStatus::Running).unwrap();
                return;
            }
            session.set_status(s, AgentStatus::Running).unwrap();
            session.set_status(s, AgentStatus::Done).unwrap();
        }
    }

    #[test]
    fn test_sub_queries_write_once() {
        let session = Session::new("q");
        session.set_sub_queries(vec!["a".into()]).unwrap();
        let err = session.set_sub_queries(vec!["b".into()]).unwrap_err();
        assert!(matches!(err, StateError::AlreadySet { field } if field == "sub_queries"));
        assert_eq!(session.sub_queries(), vec!["a".to_string()]);
    }

    #[test]
    fn test_status_forward_only() {
        let session = Session::new("q");
        session
            .set_status(Stage::Planner, AgentStatus::Running)
            .unwrap();
        session
            .set_status(Stage::Planner, AgentStatus::Done)
            .unwrap();

        let err = session
            .set_status(Stage::Planner, AgentStatus::Running)
            .unwrap_err();
        assert!(matches!(err, StateError::StatusRegression { .. }));
    }

    #[test]
    fn test_done_requires_running() {
        let session = Session::new("q");
        let err = session
            .set_status(Stage::Planner, AgentStatus::Done)
            .unwrap_err();
        assert!(matches!(err, StateError::StatusRegression { .. }));
    }

    #[test]
    fn test_stage_order_enforced() {
        let session = Session::new("q");
        let err = session
            .set_status(Stage::Analyst, AgentStatus::Running)
            .unwrap_err();
        assert!(matches!(err, StateError::StageOrder { stage } if stage == "analyst"));
    }

    #[test]
    fn test_findings_require_researchers_done() {
        let session = Session::new("q");
        let err = session.set_findings(vec![]).unwrap_err();
        assert!(matches!(err, StateError::OutOfOrder { field, .. } if field == "findings"));

        walk_to(&session, Stage::Analyst);
        session.set_findings(vec![]).unwrap();
        let err = session.set_findings(vec![]).unwrap_err();
        assert!(matches!(err, StateError::AlreadySet { field } if field == "findings"));
    }

    #[test]
    fn test_report_requires_analyst_done() {
        let session = Session::new("q");
        walk_to(&session, Stage::Analyst);
        session.set_findings(vec![]).unwrap();

        let err = session.set_report("r".into()).unwrap_err();
        assert!(matches!(err, StateError::OutOfOrder { field, .. } if field == "report"));

        session.set_status(Stage::Analyst, AgentStatus::Done).unwrap();
        session.set_report("r".into()).unwrap();
        assert_eq!(session.report().as_deref(), Some("r"));
    }

    #[test]
    fn test_status_transitions_are_logged() {
        let session = Session::new("q");
        session
            .set_status(Stage::Planner, AgentStatus::Running)
            .unwrap();
        let logs = session.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("planner -> running"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_lost() {
        let session = Arc::new(Session::new("q"));
        let mut handles = Vec::new();
        for i in 0..16 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session.append_raw_results(RawResult {
                    sub_query_index: i,
                    query: format!("q{i}"),
                    hits: vec![],
                    attempts: 1,
                    succeeded: true,
                });
                session.append_log(format!("task {i}"));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(session.raw_results().len(), 16);
        assert_eq!(session.logs().len(), 16);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let session = Session::new("what is x");
        session.set_sub_queries(vec!["a".into(), "b".into()]).unwrap();
        session.append_log("started");
        session.complete();

        let snap = session.snapshot();
        assert_eq!(snap.query, "what is x");
        assert_eq!(snap.sub_queries.len(), 2);
        assert_eq!(snap.agent_statuses.len(), 4);
        assert!(snap.completed_at.is_some());
        assert!(snap.report.is_none());
    }

    #[test]
    fn test_summary_counts() {
        let session = Session::new("q");
        session.set_sub_queries(vec!["a".into(), "b".into()]).unwrap();
        session.append_raw_results(RawResult {
            sub_query_index: 0,
            query: "a".into(),
            hits: vec![],
            attempts: 1,
            succeeded: true,
        });
        session.append_raw_results(RawResult {
            sub_query_index: 1,
            query: "b".into(),
            hits: vec![],
            attempts: 3,
            succeeded: false,
        });

        let summary = session.summary();
        assert_eq!(summary.sub_query_count, 2);
        assert_eq!(summary.succeeded_searches, 1);
        assert_eq!(summary.failed_searches, 1);
        assert!(!summary.has_report);
    }
}
