//! Triage runner: rank candidates, fetch payloads, enforce the budget, and
//! assemble per-candidate decisions.
//!
//! The runner is the engine's public entry point. It owns the pool registry
//! and the activity clock, and it never fails: every outcome, including
//! internal errors and deadline expiry, folds into the returned report.

use crate::analyzer::{PoolAccess, TriageAnalyzer};
use crate::config::RunnerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::fetch::{HttpNzbFetcher, NzbFetcher};
use crate::nntp::connection::{NntpConnector, TcpNntpConnector};
use crate::nntp::registry::PoolRegistry;
use crate::nntp::TriageActivity;
use crate::types::{
    CandidateStatus, CandidateSummary, NzbCandidate, NzbDecision, TriageReport, normalize_title,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// The triage engine.
///
/// One runner per embedding application; the shared NNTP pool lives in the
/// runner's registry and is reused across [`run`](TriageRunner::run) calls.
pub struct TriageRunner {
    config: RunnerConfig,
    fetcher: Arc<dyn NzbFetcher>,
    connector: Option<Arc<dyn NntpConnector>>,
    registry: PoolRegistry,
    activity: TriageActivity,
}

/// Outcome of one payload fetch, parallel to the ranked candidate list.
enum FetchOutcome {
    /// Budget expired before this candidate was dispatched
    NotAttempted,
    /// The HTTP fetch failed
    Failed(String),
    /// Payload downloaded
    Fetched(String),
}

impl TriageRunner {
    /// New runner with the production capabilities (reqwest HTTP fetcher and
    /// TCP/TLS NNTP connector).
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let fetcher = Arc::new(
            HttpNzbFetcher::new().map_err(|e| Error::Other(e.message))?,
        );
        Ok(Self::with_capabilities(config, fetcher, None))
    }

    /// New runner with injected capabilities.
    ///
    /// `connector: None` falls back to the TCP/TLS connector built from the
    /// configured NNTP server.
    pub fn with_capabilities(
        config: RunnerConfig,
        fetcher: Arc<dyn NzbFetcher>,
        connector: Option<Arc<dyn NntpConnector>>,
    ) -> Self {
        let activity = TriageActivity::new();
        Self {
            config,
            fetcher,
            connector,
            registry: PoolRegistry::new(activity.clone()),
            activity,
        }
    }

    /// Open the shared NNTP pool ahead of the first triage run.
    ///
    /// Idempotent; concurrent callers coalesce onto a single in-flight build.
    /// A runner without an NNTP server configured is a no-op.
    pub async fn pre_warm_nntp_pool(&self) -> Result<()> {
        match self.resolve_pool().await {
            PoolAccess::Failed(code) => Err(Error::Other(format!(
                "NNTP pool pre-warm failed: {}",
                code
            ))),
            _ => Ok(()),
        }
    }

    /// Close the shared NNTP pool, if one is open.
    pub async fn close(&self) {
        self.registry.close().await;
    }

    /// Triage a batch of competing NZB candidates.
    ///
    /// Never fails: fetch failures, analysis errors, and deadline expiry are
    /// all reported per candidate in the returned [`TriageReport`].
    pub async fn run(&self, candidates: Vec<NzbCandidate>) -> TriageReport {
        let started = Instant::now();
        self.activity.mark();

        let ranked = rank_candidates(candidates, &self.config);
        let considered = ranked.len();
        let budget = Duration::from_millis(self.config.time_budget_ms);
        tracing::debug!(
            candidates = considered,
            budget_ms = self.config.time_budget_ms,
            "triage run starting"
        );

        let timed_out = AtomicBool::new(false);
        let fetches = self.fetch_stage(&ranked, started, budget, &timed_out).await;

        // Analyze successfully fetched payloads in ranked order
        let mut batch_index_by_rank: Vec<Option<usize>> = vec![None; ranked.len()];
        let mut payloads = Vec::new();
        for (rank, outcome) in fetches.iter().enumerate() {
            if let FetchOutcome::Fetched(payload) = outcome {
                batch_index_by_rank[rank] = Some(payloads.len());
                payloads.push(payload.clone());
            }
        }

        let mut decisions: Vec<Option<NzbDecision>> = vec![None; payloads.len()];
        if !payloads.is_empty() {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                timed_out.store(true, Ordering::SeqCst);
            } else {
                let remaining = budget - elapsed;
                let health = Duration::from_millis(self.config.triage.health_check_timeout_ms);
                let deadline = remaining.min(health);
                let pool = self.resolve_pool().await;
                let analyzer =
                    TriageAnalyzer::new(Arc::new(self.config.triage.clone()), pool);
                let outcome = analyzer.analyze_batch(payloads, deadline).await;
                if outcome.timed_out {
                    let code = if remaining < health {
                        ErrorKind::TriageTimeout
                    } else {
                        ErrorKind::HealthcheckTimeout
                    };
                    tracing::warn!(code = code.as_code(), "triage deadline expired");
                    timed_out.store(true, Ordering::SeqCst);
                }
                decisions = outcome.decisions;
            }
        }

        let timed_out = timed_out.load(Ordering::SeqCst);
        let evaluated_count = decisions.iter().filter(|d| d.is_some()).count();
        let mut fetch_failures = 0;

        let mut report_decisions = HashMap::with_capacity(ranked.len());
        let mut status_counts: HashMap<CandidateStatus, usize> = HashMap::new();
        for (rank, candidate) in ranked.iter().enumerate() {
            let summary = match &fetches[rank] {
                FetchOutcome::Failed(message) => {
                    fetch_failures += 1;
                    fetch_error_summary(candidate, message)
                }
                FetchOutcome::Fetched(_) => {
                    let decision = batch_index_by_rank[rank]
                        .and_then(|i| decisions.get_mut(i).and_then(Option::take));
                    match decision {
                        Some(decision) => summarize(decision, candidate),
                        None => bare_summary(
                            if timed_out {
                                CandidateStatus::Pending
                            } else {
                                CandidateStatus::Skipped
                            },
                            candidate,
                        ),
                    }
                }
                FetchOutcome::NotAttempted => bare_summary(
                    if timed_out {
                        CandidateStatus::Pending
                    } else {
                        CandidateStatus::Skipped
                    },
                    candidate,
                ),
            };
            *status_counts.entry(summary.status).or_default() += 1;
            report_decisions.insert(candidate.download_url.clone(), summary);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            elapsed_ms,
            evaluated = evaluated_count,
            fetch_failures,
            timed_out,
            "triage run finished"
        );
        TriageReport {
            decisions: report_decisions,
            elapsed_ms,
            timed_out,
            candidates_considered: considered,
            evaluated_count,
            fetch_failures,
            summary: summary_line(considered, &status_counts),
        }
    }

    /// Download payloads with bounded concurrency, respecting the budget.
    ///
    /// The budget is checked before each dispatch; once exceeded, no new
    /// requests start but in-flight ones drain.
    async fn fetch_stage(
        &self,
        ranked: &[NzbCandidate],
        started: Instant,
        budget: Duration,
        timed_out: &AtomicBool,
    ) -> Vec<FetchOutcome> {
        let n = ranked.len();
        if n == 0 {
            return Vec::new();
        }
        let results = Mutex::new(
            std::iter::repeat_with(|| FetchOutcome::NotAttempted)
                .take(n)
                .collect::<Vec<_>>(),
        );
        let cursor = AtomicUsize::new(0);
        let timeout = Duration::from_millis(self.config.download_timeout_ms);
        let workers = self.config.download_concurrency.clamp(1, n);

        {
            let results = &results;
            let cursor = &cursor;
            let fetcher = &self.fetcher;
            futures::future::join_all((0..workers).map(|_| async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    if index >= n {
                        return;
                    }
                    if started.elapsed() >= budget {
                        timed_out.store(true, Ordering::SeqCst);
                        return;
                    }
                    let url = &ranked[index].download_url;
                    let outcome = match fetcher.fetch_nzb(url, timeout).await {
                        Ok(payload) if payload.is_empty() => {
                            FetchOutcome::Failed(format!("empty body from '{}'", url))
                        }
                        Ok(payload) => FetchOutcome::Fetched(payload),
                        Err(e) => {
                            tracing::debug!(url = %url, error = %e, "NZB fetch failed");
                            FetchOutcome::Failed(e.message)
                        }
                    };
                    results.lock().await[index] = outcome;
                }
            }))
            .await;
        }
        results.into_inner()
    }

    /// Resolve the shared pool for this run.
    ///
    /// Failures degrade to local-only checks; the failure code is surfaced on
    /// every NZB of the batch as an `nntp-error:<code>` warning.
    async fn resolve_pool(&self) -> PoolAccess {
        let Some(nntp_config) = &self.config.triage.nntp else {
            return PoolAccess::Disabled;
        };
        let connector: Arc<dyn NntpConnector> = match &self.connector {
            Some(connector) => Arc::clone(connector),
            None => match TcpNntpConnector::new(nntp_config.clone()) {
                Ok(connector) => Arc::new(connector),
                Err(e) => {
                    tracing::error!(error = %e, "NNTP connector setup failed");
                    return PoolAccess::Failed(e.kind.as_code().to_string());
                }
            },
        };
        match self
            .registry
            .obtain(
                nntp_config,
                connector,
                self.config.triage.nntp_max_connections,
                self.config.triage.nntp_keep_alive_ms,
                self.config.triage.reuse_nntp_pool,
            )
            .await
        {
            Ok(pool) => PoolAccess::Ready(pool),
            Err(e) => {
                tracing::error!(error = %e, "NNTP pool unavailable, continuing local-only");
                PoolAccess::Failed(e.kind.as_code().to_string())
            }
        }
    }
}

/// Rank, dedupe, and truncate the candidate list.
///
/// Candidates without a URL are dropped, URLs and normalized titles are
/// deduplicated first-wins, preferred-indexer candidates precede all others,
/// and each partition is sorted by size proximity (or descending size). All
/// sorts are stable, so equal-key candidates keep input order.
fn rank_candidates(input: Vec<NzbCandidate>, config: &RunnerConfig) -> Vec<NzbCandidate> {
    let mut seen_urls = HashSet::new();
    let unique: Vec<NzbCandidate> = input
        .into_iter()
        .filter(|c| !c.download_url.is_empty())
        .filter(|c| seen_urls.insert(c.download_url.clone()))
        .collect();

    let preferred_ids: Vec<String> = config
        .preferred_indexer_ids
        .iter()
        .map(|id| id.trim().to_lowercase())
        .filter(|id| !id.is_empty())
        .collect();

    let (mut preferred, mut fallback): (Vec<_>, Vec<_>) = if preferred_ids.is_empty() {
        (Vec::new(), unique)
    } else {
        unique.into_iter().partition(|c| {
            c.indexer_id
                .as_deref()
                .is_some_and(|id| preferred_ids.contains(&id.to_lowercase()))
                || c.indexer_name
                    .as_deref()
                    .is_some_and(|name| preferred_ids.contains(&name.to_lowercase()))
        })
    };

    let sort = |list: &mut Vec<NzbCandidate>| match config.preferred_size_bytes {
        Some(target) => list.sort_by(|a, b| {
            a.size
                .abs_diff(target)
                .cmp(&b.size.abs_diff(target))
                .then_with(|| b.size.cmp(&a.size))
        }),
        None => list.sort_by(|a, b| b.size.cmp(&a.size)),
    };
    sort(&mut preferred);
    sort(&mut fallback);
    preferred.append(&mut fallback);

    let mut seen_titles = HashSet::new();
    let mut ranked: Vec<NzbCandidate> = preferred
        .into_iter()
        .filter(|c| {
            let title = normalize_title(c.title.as_deref());
            title.is_empty() || seen_titles.insert(title)
        })
        .collect();
    ranked.truncate(config.max_candidates);
    ranked
}

fn summarize(decision: NzbDecision, candidate: &NzbCandidate) -> CandidateSummary {
    let has_positive = decision
        .archive_findings
        .iter()
        .any(|f| f.status.is_positive());
    let status = match decision.decision {
        crate::types::Decision::Accept if has_positive => CandidateStatus::Verified,
        crate::types::Decision::Accept => CandidateStatus::Unverified,
        crate::types::Decision::Reject => CandidateStatus::Blocked,
    };
    CandidateSummary {
        status,
        blockers: decision.blockers,
        warnings: decision.warnings,
        nzb_index: Some(decision.nzb_index),
        file_count: Some(decision.file_count),
        archive_findings: decision.archive_findings,
        title: candidate.title.clone(),
        normalized_title: normalize_title(candidate.title.as_deref()),
        indexer_id: candidate.indexer_id.clone(),
        indexer_name: candidate.indexer_name.clone(),
    }
}

fn fetch_error_summary(candidate: &NzbCandidate, message: &str) -> CandidateSummary {
    let mut blockers = BTreeSet::new();
    blockers.insert("fetch-error".to_string());
    let mut warnings = BTreeSet::new();
    warnings.insert(message.to_string());
    CandidateSummary {
        status: CandidateStatus::FetchError,
        blockers,
        warnings,
        nzb_index: None,
        file_count: None,
        archive_findings: Vec::new(),
        title: candidate.title.clone(),
        normalized_title: normalize_title(candidate.title.as_deref()),
        indexer_id: candidate.indexer_id.clone(),
        indexer_name: candidate.indexer_name.clone(),
    }
}

fn bare_summary(status: CandidateStatus, candidate: &NzbCandidate) -> CandidateSummary {
    CandidateSummary {
        status,
        blockers: BTreeSet::new(),
        warnings: BTreeSet::new(),
        nzb_index: None,
        file_count: None,
        archive_findings: Vec::new(),
        title: candidate.title.clone(),
        normalized_title: normalize_title(candidate.title.as_deref()),
        indexer_id: candidate.indexer_id.clone(),
        indexer_name: candidate.indexer_name.clone(),
    }
}

fn summary_line(
    considered: usize,
    counts: &HashMap<CandidateStatus, usize>,
) -> Option<String> {
    if considered == 0 {
        return None;
    }
    let count = |status: CandidateStatus| counts.get(&status).copied().unwrap_or(0);
    Some(format!(
        "{} candidates: {} verified, {} unverified, {} blocked, {} fetch errors, {} pending, {} skipped",
        considered,
        count(CandidateStatus::Verified),
        count(CandidateStatus::Unverified),
        count(CandidateStatus::Blocked),
        count(CandidateStatus::FetchError),
        count(CandidateStatus::Pending),
        count(CandidateStatus::Skipped),
    ))
}
