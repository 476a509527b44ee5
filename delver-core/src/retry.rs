//! Rephrase-and-retry loop around one search task.
//!
//! Each sub-query runs as an explicit state machine: attempt, classify the
//! failure, optionally ask the planner for a rephrased query, attempt again,
//! until success or the attempt bound is exhausted. The final record is
//! always appended to the session exactly once, succeeded or not.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::Planner;
use crate::error::SearchFailure;
use crate::executor::SearchExecutor;
use crate::session::{RawResult, SearchHit, Session};

/// Where one search task currently stands in its retry loop.
#[derive(Debug)]
enum TaskState {
    /// About to run the next attempt with the current query text.
    Attempting,
    /// The last attempt failed; decide whether to rephrase, then re-attempt.
    Retrying(SearchFailure),
    ExhaustedRetries,
}

/// How one search task ended.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Succeeded { attempts: u32, hits: Vec<SearchHit> },
    ExhaustedRetries { attempts: u32 },
    /// Cut short by the deadline before reaching a terminal state.
    Cancelled,
}

impl SearchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SearchOutcome::Succeeded { .. })
    }
}

/// Drives a single sub-query to a terminal outcome, rephrasing between
/// failed attempts when the failure kind warrants it.
pub struct RetryCoordinator {
    executor: Arc<SearchExecutor>,
    planner: Arc<dyn Planner>,
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new(executor: Arc<SearchExecutor>, planner: Arc<dyn Planner>, max_retries: u32) -> Self {
        Self {
            executor,
            planner,
            max_retries,
        }
    }

    /// Run one sub-query to completion. Total attempts are bounded by
    /// `max_retries + 1`. Cancellation is observed between and during
    /// attempts; a cancelled task records nothing in the session, the
    /// caller decides what a partial run means.
    pub async fn run(
        &self,
        sub_query: &str,
        index: usize,
        session: &Session,
        cancel: &CancellationToken,
    ) -> SearchOutcome {
        let original_query = session.query();
        let mut current = sub_query.to_string();
        let mut attempt: u32 = 0;
        let mut state = TaskState::Attempting;

        loop {
            match state {
                TaskState::Attempting => {
                    attempt += 1;
                    session.append_log(format!(
                        "researcher[{index}] attempt {attempt}: '{current}'"
                    ));

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(index, attempt, "search task cancelled");
                            return SearchOutcome::Cancelled;
                        }
                        result = self.executor.execute(&current) => result,
                    };

                    state = match result {
                        Ok(bundle) => {
                            session.append_raw_results(RawResult {
                                sub_query_index: index,
                                query: current.clone(),
                                hits: bundle.hits.clone(),
                                attempts: attempt,
                                succeeded: true,
                            });
                            info!(
                                index,
                                attempt,
                                hits = bundle.hits.len(),
                                from_cache = bundle.from_cache,
                                "search task succeeded"
                            );
                            return SearchOutcome::Succeeded {
                                attempts: attempt,
                                hits: bundle.hits,
                            };
                        }
                        Err(failure) => {
                            debug!(index, attempt, %failure, "search attempt failed");
                            if attempt > self.max_retries {
                                TaskState::ExhaustedRetries
                            } else {
                                TaskState::Retrying(failure)
                            }
                        }
                    };
                }

                TaskState::Retrying(failure) => {
                    if failure.wants_rephrase() {
                        match self
                            .planner
                            .rephrase(&original_query, &current, &failure)
                            .await
                        {
                            Ok(rephrased) => {
                                session.append_log(format!(
                                    "researcher[{index}] rephrased '{current}' -> '{rephrased}'"
                                ));
                                current = rephrased;
                            }
                            // A planner hiccup must not sink the search task;
                            // retry with the text we already have.
                            Err(e) => {
                                warn!(index, error = %e, "rephrase failed, keeping query");
                            }
                        }
                    }
                    state = TaskState::Attempting;
                }

                TaskState::ExhaustedRetries => {
                    session.append_raw_results(RawResult {
                        sub_query_index: index,
                        query: current.clone(),
                        hits: Vec::new(),
                        attempts: attempt,
                        succeeded: false,
                    });
                    session.append_log(format!(
                        "researcher[{index}] gave up after {attempt} attempts"
                    ));
                    warn!(index, attempts = attempt, "search task exhausted retries");
                    return SearchOutcome::ExhaustedRetries { attempts: attempt };
                }
            }
        }
    }
}
