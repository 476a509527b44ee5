//! The research pipeline: Planning -> Searching -> Analyzing -> Writing.
//!
//! The orchestrator owns the session, drives the four stages in order, and
//! maps every stage failure to a typed error that carries a full session
//! snapshot for diagnostics. Stages never run out of order and a failed
//! stage ends the run.

use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use crate::capability::{Analyst, Planner, SearchProvider, Writer};
use crate::cache::SearchCache;
use crate::config::ResearchConfig;
use crate::error::{CapabilityError, DelverError};
use crate::executor::SearchExecutor;
use crate::pool::ConcurrencyPool;
use crate::report::ResearchReport;
use crate::retry::{RetryCoordinator, SearchOutcome};
use crate::session::{AgentStatus, Finding, Session, SessionSnapshot, Stage};

/// Where the pipeline currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Planning,
    Searching,
    Analyzing,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Planning => "planning",
            RunPhase::Searching => "searching",
            RunPhase::Analyzing => "analyzing",
            RunPhase::Writing => "writing",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A failed run: which phase broke, why, and everything the session had
/// accumulated up to that point.
#[derive(Debug, thiserror::Error)]
#[error("research pipeline failed at {phase} stage: {error}")]
pub struct PipelineFailure {
    pub phase: RunPhase,
    #[source]
    pub error: DelverError,
    pub session: SessionSnapshot,
}

/// Drives one research question through the full pipeline.
pub struct Orchestrator {
    config: ResearchConfig,
    planner: Arc<dyn Planner>,
    analyst: Arc<dyn Analyst>,
    writer: Arc<dyn Writer>,
    coordinator: Arc<RetryCoordinator>,
}

impl Orchestrator {
    pub fn new(
        config: ResearchConfig,
        planner: Arc<dyn Planner>,
        search_provider: Arc<dyn SearchProvider>,
        analyst: Arc<dyn Analyst>,
        writer: Arc<dyn Writer>,
    ) -> Self {
        let cache = Arc::new(SearchCache::new(
            config.cache.dir.clone(),
            config.cache.ttl_secs,
        ));
        let executor = Arc::new(SearchExecutor::new(
            search_provider,
            cache,
            config.relevance_threshold,
        ));
        let coordinator = Arc::new(RetryCoordinator::new(
            executor,
            planner.clone(),
            config.max_retries,
        ));
        Self {
            config,
            planner,
            analyst,
            writer,
            coordinator,
        }
    }

    /// Run the whole pipeline for one question.
    pub async fn run(&self, query: &str) -> Result<ResearchReport, PipelineFailure> {
        let session = Arc::new(Session::new(query));
        info!(session_id = %session.id(), query, "research run started");

        let mut phase = RunPhase::Planning;
        let result = self.drive(query, &session, &mut phase).await;
        session.complete();

        match result {
            Ok((content, findings, failed, total)) => {
                phase = RunPhase::Done;
                let summary = session.summary();
                info!(
                    session_id = %session.id(),
                    %phase,
                    findings = summary.findings_count,
                    duration_secs = summary.duration_secs,
                    "research run finished"
                );
                Ok(ResearchReport::new(
                    query,
                    content,
                    &findings,
                    failed,
                    total,
                    session.snapshot(),
                ))
            }
            Err(error) => {
                error!(session_id = %session.id(), %phase, %error, "research run failed");
                Err(PipelineFailure {
                    phase,
                    error,
                    session: session.snapshot(),
                })
            }
        }
    }

    async fn drive(
        &self,
        query: &str,
        session: &Arc<Session>,
        phase: &mut RunPhase,
    ) -> Result<(String, Vec<Finding>, usize, usize), DelverError> {
        // Planning.
        *phase = RunPhase::Planning;
        session.set_status(Stage::Planner, AgentStatus::Running)?;
        let sub_queries = match self.planner.decompose(query).await {
            Ok(subs) if subs.is_empty() => {
                session.set_status(Stage::Planner, AgentStatus::Failed)?;
                return Err(CapabilityError::EmptyOutput {
                    capability: "planner",
                }
                .into());
            }
            Ok(subs) => subs,
            Err(e) => {
                session.set_status(Stage::Planner, AgentStatus::Failed)?;
                return Err(e.into());
            }
        };
        session.set_sub_queries(sub_queries.clone())?;
        session.append_log(format!("planner produced {} sub-queries", sub_queries.len()));
        session.set_status(Stage::Planner, AgentStatus::Done)?;
        info!(sub_queries = sub_queries.len(), "planning complete");

        // Searching.
        *phase = RunPhase::Searching;
        session.set_status(Stage::Researchers, AgentStatus::Running)?;
        let pool =
            ConcurrencyPool::new(self.config.max_parallel_searches).with_deadline(self.config.deadline());
        let outcomes = pool
            .run_all(self.coordinator.clone(), &sub_queries, session.clone())
            .await;

        let cancelled = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SearchOutcome::Cancelled))
            .count();
        if cancelled > 0 {
            session.set_status(Stage::Researchers, AgentStatus::Failed)?;
            return Err(DelverError::Cancelled);
        }

        let succeeded = outcomes.iter().filter(|(_, o)| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        session.append_log(format!(
            "researchers: {succeeded} of {} searches succeeded",
            outcomes.len()
        ));
        session.set_status(Stage::Researchers, AgentStatus::Done)?;
        info!(succeeded, failed, "searching complete");

        // Analyzing.
        *phase = RunPhase::Analyzing;
        session.set_status(Stage::Analyst, AgentStatus::Running)?;
        let raw_results = session.raw_results();
        let findings = match self.analyst.judge(query, &raw_results).await {
            Ok(findings) => findings,
            Err(e) => {
                session.set_status(Stage::Analyst, AgentStatus::Failed)?;
                return Err(e.into());
            }
        };
        session.append_log(format!("analyst accepted {} findings", findings.len()));
        session.set_findings(findings.clone())?;
        session.set_status(Stage::Analyst, AgentStatus::Done)?;
        info!(findings = findings.len(), "analysis complete");

        // Writing.
        *phase = RunPhase::Writing;
        session.set_status(Stage::Writer, AgentStatus::Running)?;
        let content = match self.writer.compose(query, &findings).await {
            Ok(content) => content,
            Err(e) => {
                session.set_status(Stage::Writer, AgentStatus::Failed)?;
                return Err(e.into());
            }
        };
        session.set_report(content.clone())?;
        session.append_log("writer composed report".to_string());
        session.set_status(Stage::Writer, AgentStatus::Done)?;

        Ok((content, findings, failed, outcomes.len()))
    }
}
