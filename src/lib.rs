//! # nzb-triage
//!
//! Time-budgeted triage engine for competing NZBs: given a batch of payloads
//! describing the same nominal release, decide which are likely to stream
//! successfully end-to-end and rank them.
//!
//! The verdict is derived from two cheap, non-destructive probes against a
//! Usenet article store (and, optionally, a local archive cache):
//! - does the first segment of a representative archive volume still exist
//!   on the provider, and
//! - is that archive *stored* (non-compressed, non-encrypted, non-solid),
//!   the hard prerequisite for random-access streaming.
//!
//! ## Design Philosophy
//!
//! - **Bounded** - every stage runs under a deadline; the engine always
//!   returns a well-formed report within the configured budget
//! - **Non-destructive** - only STAT probes and one bounded BODY per NZB;
//!   nothing is downloaded in full and nothing is written
//! - **Library-first** - no CLI or UI; HTTP, NNTP, and filesystem access are
//!   injected capabilities
//!
//! ## Quick Start
//!
//! ```no_run
//! use nzb_triage::{NzbCandidate, RunnerConfig, TriageRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = TriageRunner::new(RunnerConfig::default())?;
//!
//!     let report = runner
//!         .run(vec![NzbCandidate {
//!             download_url: "https://indexer.example/get/abc".to_string(),
//!             title: Some("Some.Movie.2024".to_string()),
//!             size: 14_000_000_000,
//!             ..Default::default()
//!         }])
//!         .await;
//!
//!     for (url, summary) in &report.decisions {
//!         println!("{} -> {}", url, summary.status);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-NZB triage analysis
pub mod analyzer;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// NZB payload fetching
pub mod fetch;
/// Archive signature inspection
pub mod inspect;
/// NNTP transport, pool, and shared-pool lifecycle
pub mod nntp;
/// NZB document parsing
pub mod nzb;
/// Triage runner (ranking, budget, assembly)
pub mod runner;
/// Core types: candidates, findings, decisions, reports
pub mod types;
/// Bounded yEnc decoding
pub mod yenc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{NntpConfig, RunnerConfig, TriageConfig};
pub use error::{Error, ErrorKind, NntpError, Result};
pub use fetch::{HttpNzbFetcher, NzbFetcher};
pub use nntp::{NntpClient, NntpConnector, NntpPool, PoolRegistry, TriageActivity};
pub use runner::TriageRunner;
pub use types::{
    ArchiveFinding, CandidateStatus, CandidateSummary, Decision, FindingSource, FindingStatus,
    NzbCandidate, NzbDecision, TriageReport,
};
