//! Delver — a multi-stage research pipeline.
//!
//! A research run decomposes a question into sub-queries, fans the searches
//! out with bounded parallelism and bounded retries, filters the results,
//! and composes a sourced report. All generative and hosted capabilities sit
//! behind traits; the shipped defaults are deterministic heuristics plus a
//! Tavily-backed search provider.
//!
//! ```no_run
//! use std::sync::Arc;
//! use delver_core::config::ResearchConfig;
//! use delver_core::heuristics::{HeuristicPlanner, ScoreAnalyst, TemplateWriter};
//! use delver_core::orchestrator::Orchestrator;
//! use delver_core::providers::TavilySearch;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResearchConfig::default();
//! let search = TavilySearch::new("tvly-...", config.max_search_results,
//!     std::time::Duration::from_secs(config.search.timeout_secs))?;
//! let orchestrator = Orchestrator::new(
//!     config.clone(),
//!     Arc::new(HeuristicPlanner::new()),
//!     Arc::new(search),
//!     Arc::new(ScoreAnalyst::new(config.relevance_threshold, config.fallback_relevance_threshold)),
//!     Arc::new(TemplateWriter::new()),
//! );
//! let report = orchestrator.run("rust async runtimes").await?;
//! println!("{}", report.render());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod executor;
pub mod heuristics;
pub mod orchestrator;
pub mod pool;
pub mod providers;
pub mod report;
pub mod retry;
pub mod session;

pub use config::{ResearchConfig, load_config};
pub use error::{DelverError, Result};
pub use orchestrator::{Orchestrator, PipelineFailure, RunPhase};
pub use report::ResearchReport;
pub use session::{Session, SessionSnapshot, SessionSummary};
