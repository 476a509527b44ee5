//! Bounded fan-out for the search stage.
//!
//! Sub-queries are admitted strictly in submission order: the parent loop
//! acquires a semaphore permit before spawning each task, so a later
//! sub-query can never start ahead of an earlier one still waiting for a
//! slot. An optional wall-clock deadline covers the whole stage; when it
//! fires, a shared token cancels every running and not-yet-admitted task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry::{RetryCoordinator, SearchOutcome};
use crate::session::Session;

/// Runs search tasks with bounded parallelism and an optional stage deadline.
pub struct ConcurrencyPool {
    limit: usize,
    deadline: Option<Duration>,
}

impl ConcurrencyPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Fan out all sub-queries through the coordinator. The returned vector
    /// is in submission order regardless of completion order; tasks that
    /// never got to run because the deadline fired report `Cancelled`.
    pub async fn run_all(
        &self,
        coordinator: Arc<RetryCoordinator>,
        sub_queries: &[String],
        session: Arc<Session>,
    ) -> Vec<(String, SearchOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let cancel = CancellationToken::new();

        let watchdog = self.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(?deadline, "search stage deadline exceeded, cancelling");
                cancel.cancel();
            })
        });

        let mut handles = Vec::with_capacity(sub_queries.len());
        for (index, sub_query) in sub_queries.iter().enumerate() {
            // Admission happens here, in the parent, so FIFO order holds.
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                debug!(index, "sub-query not admitted, deadline already fired");
                handles.push((sub_query.clone(), None));
                continue;
            };

            let coordinator = coordinator.clone();
            let session = session.clone();
            let cancel = cancel.clone();
            let query = sub_query.clone();
            let handle = tokio::spawn(async move {
                let outcome = coordinator.run(&query, index, &session, &cancel).await;
                drop(permit);
                outcome
            });
            handles.push((sub_query.clone(), Some(handle)));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (query, handle) in handles {
            let outcome = match handle {
                None => SearchOutcome::Cancelled,
                Some(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(query = %query, error = %e, "search task aborted");
                        SearchOutcome::Cancelled
                    }
                },
            };
            outcomes.push((query, outcome));
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SearchCache;
    use crate::capability::{Planner, SearchProvider};
    use crate::error::{CapabilityError, SearchFailure};
    use crate::executor::SearchExecutor;
    use crate::session::SearchHit;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct EchoPlanner;

    #[async_trait]
    impl Planner for EchoPlanner {
        async fn decompose(&self, query: &str) -> Result<Vec<String>, CapabilityError> {
            Ok(vec![query.to_string()])
        }

        async fn rephrase(
            &self,
            _original_query: &str,
            failed_query: &str,
            _reason: &SearchFailure,
        ) -> Result<String, CapabilityError> {
            Ok(format!("{failed_query} again"))
        }
    }

    /// Tracks the high-water mark of simultaneously in-flight fetches.
    struct GaugeProvider {
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
        delay: Duration,
    }

    impl GaugeProvider {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl SearchProvider for GaugeProvider {
        async fn fetch(&self, query: &str) -> Result<Vec<SearchHit>, SearchFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![SearchHit {
                title: "t".into(),
                url: format!("https://example.com/{query}"),
                snippet: "s".into(),
                relevance_score: 0.9,
            }])
        }
    }

    /// Never completes a fetch; used to exercise the deadline path.
    struct StalledProvider;

    #[async_trait]
    impl SearchProvider for StalledProvider {
        async fn fetch(&self, _query: &str) -> Result<Vec<SearchHit>, SearchFailure> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn coordinator(dir: &TempDir, provider: Arc<dyn SearchProvider>) -> Arc<RetryCoordinator> {
        let cache = Arc::new(SearchCache::new(dir.path(), 3600));
        let executor = Arc::new(SearchExecutor::new(provider, cache, 0.5));
        Arc::new(RetryCoordinator::new(executor, Arc::new(EchoPlanner), 2))
    }

    fn queries(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sub query {i}")).collect()
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(20)));
        let coordinator = coordinator(&dir, provider.clone());
        let session = Arc::new(Session::new("q"));

        let pool = ConcurrencyPool::new(3);
        let outcomes = pool.run_all(coordinator, &queries(10), session).await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|(_, o)| o.is_success()));
        assert!(provider.high_water.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_outcomes_keep_submission_order() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(1)));
        let coordinator = coordinator(&dir, provider);
        let session = Arc::new(Session::new("q"));

        let submitted = queries(6);
        let pool = ConcurrencyPool::new(2);
        let outcomes = pool
            .run_all(coordinator, &submitted, session)
            .await;

        let returned: Vec<_> = outcomes.iter().map(|(q, _)| q.clone()).collect();
        assert_eq!(returned, submitted);
    }

    #[tokio::test]
    async fn test_deadline_cancels_everything() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, Arc::new(StalledProvider));
        let session = Arc::new(Session::new("q"));

        let pool = ConcurrencyPool::new(2).with_deadline(Some(Duration::from_millis(30)));
        let outcomes = pool.run_all(coordinator, &queries(5), session).await;

        assert_eq!(outcomes.len(), 5);
        assert!(
            outcomes
                .iter()
                .all(|(_, o)| matches!(o, SearchOutcome::Cancelled))
        );
    }

    #[tokio::test]
    async fn test_no_deadline_runs_to_completion() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(GaugeProvider::new(Duration::from_millis(5)));
        let coordinator = coordinator(&dir, provider);
        let session = Arc::new(Session::new("q"));

        let pool = ConcurrencyPool::new(1);
        let outcomes = pool.run_all(coordinator, &queries(3), session.clone()).await;

        assert!(outcomes.iter().all(|(_, o)| o.is_success()));
        assert_eq!(session.raw_results().len(), 3);
    }
}
