//! Per-NZB triage analysis.
//!
//! For each NZB the analyzer parses the document, picks archive candidates,
//! runs the local and remote probes, and classifies every finding into
//! blockers and warnings. Batches run on a bounded worker set pulling indices
//! off a shared cursor; results land in input order and survive the batch
//! deadline.

use crate::config::TriageConfig;
use crate::error::{Error, ErrorKind, NntpError, Result};
use crate::inspect::{self, Inspection};
use crate::nntp::pool::{NntpPool, PooledClient};
use crate::nzb::{self, NzbFile};
use crate::types::{ArchiveFinding, Decision, FindingSource, FindingStatus, NzbDecision};
use crate::yenc;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Cap on bytes read from a locally cached archive volume.
const LOCAL_READ_LIMIT: u64 = 256 * 1024;

/// Availability of the NNTP pool for one batch.
#[derive(Clone)]
pub enum PoolAccess {
    /// No NNTP server configured
    Disabled,
    /// Pool construction failed with this error code
    Failed(String),
    /// Warm pool ready for probes
    Ready(Arc<NntpPool>),
}

/// Result of analyzing one batch.
pub struct BatchOutcome {
    /// Decisions in input order; None where the deadline preempted analysis
    pub decisions: Vec<Option<NzbDecision>>,
    /// Whether the batch deadline expired
    pub timed_out: bool,
}

/// Analyzer for one batch of NZB payloads.
pub struct TriageAnalyzer {
    config: Arc<TriageConfig>,
    pool: PoolAccess,
}

#[derive(Clone)]
struct BatchContext {
    config: Arc<TriageConfig>,
    pool: PoolAccess,
    payloads: Arc<Vec<String>>,
    results: Arc<Mutex<Vec<Option<NzbDecision>>>>,
    cursor: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl TriageAnalyzer {
    /// New analyzer over a resolved pool state.
    pub fn new(config: Arc<TriageConfig>, pool: PoolAccess) -> Self {
        Self { config, pool }
    }

    /// Analyze `payloads` in input order, racing the batch `deadline`.
    ///
    /// Workers pull indices off a shared cursor, so at most
    /// `min(max_parallel_nzbs, batch)` NZBs are in flight. On deadline expiry
    /// the in-flight probes are left to finish on detached tasks (their pool
    /// clients are released properly) but their late results are discarded.
    pub async fn analyze_batch(&self, payloads: Vec<String>, deadline: Duration) -> BatchOutcome {
        let n = payloads.len();
        if n == 0 {
            return BatchOutcome {
                decisions: Vec::new(),
                timed_out: false,
            };
        }

        let ctx = BatchContext {
            config: Arc::clone(&self.config),
            pool: self.pool.clone(),
            payloads: Arc::new(payloads),
            results: Arc::new(Mutex::new(vec![None; n])),
            cursor: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        };

        let workers = self
            .config
            .max_parallel_nzbs
            .unwrap_or(n)
            .clamp(1, n);
        let handles: Vec<_> = (0..workers)
            .map(|_| tokio::spawn(worker(ctx.clone())))
            .collect();

        let timed_out = tokio::time::timeout(deadline, futures::future::join_all(handles))
            .await
            .is_err();
        if timed_out {
            ctx.cancel.cancel();
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                code = ErrorKind::HealthcheckTimeout.as_code(),
                "analyzer batch deadline expired"
            );
        }

        let decisions = ctx.results.lock().await.clone();
        BatchOutcome {
            decisions,
            timed_out,
        }
    }
}

async fn worker(ctx: BatchContext) {
    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }
        let index = ctx.cursor.fetch_add(1, Ordering::SeqCst);
        if index >= ctx.payloads.len() {
            return;
        }
        let decision = match analyze_one(&ctx.config, &ctx.pool, index, &ctx.payloads[index]).await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(nzb_index = index, error = %e, "NZB analysis failed");
                rejection_for_error(index, &e)
            }
        };
        ctx.results.lock().await[index] = Some(decision);
    }
}

/// A thrown error rejects the one NZB; the batch continues.
fn rejection_for_error(index: usize, e: &Error) -> NzbDecision {
    let mut blockers = BTreeSet::new();
    blockers.insert("analysis-error".to_string());
    let mut warnings = BTreeSet::new();
    warnings.insert(format!("code:{}", e.code()));
    warnings.insert(e.to_string());
    NzbDecision {
        decision: Decision::Reject,
        blockers,
        warnings,
        file_count: 0,
        nzb_title: None,
        nzb_index: index,
        archive_findings: Vec::new(),
    }
}

/// Classification of a finding status into the decision.
enum Classification {
    /// Confirms a stored archive
    Stored,
    /// Positive liveness evidence, no decision impact
    Ok,
    /// Hard streamability blocker
    Blocker(String),
    /// Degraded-confidence warning
    Warning(String),
}

fn classify(status: FindingStatus) -> Classification {
    match status {
        FindingStatus::RarStored | FindingStatus::SevenzipStored => Classification::Stored,
        FindingStatus::SegmentOk => Classification::Ok,
        FindingStatus::RarCompressed
        | FindingStatus::RarEncrypted
        | FindingStatus::RarSolid
        | FindingStatus::Rar5Unsupported
        | FindingStatus::SevenzipUnsupported => {
            Classification::Blocker(status.as_str().to_string())
        }
        FindingStatus::StatMissing
        | FindingStatus::BodyMissing
        | FindingStatus::SegmentMissing => {
            Classification::Blocker("missing-articles".to_string())
        }
        FindingStatus::SegmentError => Classification::Warning("nntp-stat-error".to_string()),
        _ => Classification::Warning(status.as_str().to_string()),
    }
}

#[derive(Default)]
struct Findings {
    list: Vec<ArchiveFinding>,
    blockers: BTreeSet<String>,
    warnings: BTreeSet<String>,
    stored_confirmed: bool,
}

impl Findings {
    fn record(&mut self, finding: ArchiveFinding) {
        match classify(finding.status) {
            Classification::Stored => self.stored_confirmed = true,
            Classification::Ok => {}
            Classification::Blocker(name) => {
                self.blockers.insert(name);
            }
            Classification::Warning(name) => {
                self.warnings.insert(name);
            }
        }
        self.list.push(finding);
    }

    fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.insert(warning.into());
    }

    fn into_decision(self, index: usize, doc: &nzb::NzbDocument) -> NzbDecision {
        let decision = if self.blockers.is_empty() {
            Decision::Accept
        } else {
            Decision::Reject
        };
        NzbDecision {
            decision,
            blockers: self.blockers,
            warnings: self.warnings,
            file_count: doc.files.len(),
            nzb_title: doc.title.clone(),
            nzb_index: index,
            archive_findings: self.list,
        }
    }
}

fn file_finding(
    source: FindingSource,
    file: &NzbFile,
    status: FindingStatus,
    details: Option<String>,
) -> ArchiveFinding {
    ArchiveFinding {
        source,
        filename: file.filename.clone(),
        subject: Some(file.subject.clone()),
        status,
        details,
        path: None,
    }
}

fn inspection_finding(
    source: FindingSource,
    file: &NzbFile,
    inspection: Inspection,
    path: Option<PathBuf>,
) -> ArchiveFinding {
    let details = match (&inspection.details, &inspection.archived_filename) {
        (Some(d), Some(name)) => Some(format!("{} ({})", d, name)),
        (Some(d), None) => Some(d.clone()),
        (None, Some(name)) => Some(format!("contains {}", name)),
        (None, None) => None,
    };
    ArchiveFinding {
        source,
        filename: file.filename.clone(),
        subject: Some(file.subject.clone()),
        status: inspection.status,
        details,
        path,
    }
}

async fn analyze_one(
    config: &TriageConfig,
    pool: &PoolAccess,
    index: usize,
    xml: &str,
) -> Result<NzbDecision> {
    let doc = nzb::parse_nzb(xml)?;
    let mut findings = Findings::default();
    let candidates = nzb::archive_candidates(&doc.files);

    // A degraded pool is surfaced on every NZB of the batch
    match pool {
        PoolAccess::Disabled => findings.warn("nntp-disabled"),
        PoolAccess::Failed(code) => findings.warn(format!("nntp-error:{}", code)),
        PoolAccess::Ready(_) => {}
    }

    if candidates.is_empty() {
        findings.warn("no-archive-candidates");
        if let PoolAccess::Ready(nntp) = pool {
            sample_segments_across_files(config, nntp, &doc, &mut findings).await;
        }
    } else {
        if !config.archive_dirs.is_empty() {
            local_check(config, &doc, &candidates, &mut findings).await;
        }
        if let PoolAccess::Ready(nntp) = pool {
            remote_check(config, nntp, &doc, &candidates, &mut findings).await;
        }
    }

    if !findings.stored_confirmed && findings.blockers.is_empty() {
        findings.warn("rar-m0-unverified");
    }

    tracing::debug!(
        nzb_index = index,
        files = doc.files.len(),
        archive_candidates = candidates.len(),
        blockers = findings.blockers.len(),
        warnings = findings.warnings.len(),
        "NZB analyzed"
    );
    Ok(findings.into_decision(index, &doc))
}

/// No archive candidates: STAT a uniform sample of segments across all files
/// so dead uploads are still caught.
async fn sample_segments_across_files(
    config: &TriageConfig,
    pool: &Arc<NntpPool>,
    doc: &nzb::NzbDocument,
    findings: &mut Findings,
) {
    let all: Vec<(usize, &nzb::NzbSegment)> = doc
        .files
        .iter()
        .enumerate()
        .flat_map(|(idx, file)| file.segments.iter().map(move |seg| (idx, seg)))
        .collect();
    if all.is_empty() {
        return;
    }
    let sample: Vec<(usize, &nzb::NzbSegment)> = all
        .choose_multiple(&mut rand::thread_rng(), config.stat_sample_count.max(1))
        .copied()
        .collect();

    let mut lease = Lease::new(pool);
    for (file_idx, segment) in sample {
        let file = &doc.files[file_idx];
        findings.record(stat_probe_finding(
            &mut lease,
            file,
            &segment.message_id,
        )
        .await);
    }
    lease.release().await;
}

/// One liveness STAT, mapped onto the segment-* statuses.
async fn stat_probe_finding(
    lease: &mut Lease<'_>,
    file: &NzbFile,
    message_id: &str,
) -> ArchiveFinding {
    match lease.stat(message_id).await {
        Ok(()) => file_finding(FindingSource::NntpStat, file, FindingStatus::SegmentOk, None),
        Err(e) if e.kind == ErrorKind::StatMissing => file_finding(
            FindingSource::NntpStat,
            file,
            FindingStatus::SegmentMissing,
            Some(e.message),
        ),
        Err(e) => file_finding(
            FindingSource::NntpStat,
            file,
            FindingStatus::SegmentError,
            Some(e.message),
        ),
    }
}

/// Probe the local archive cache for each candidate.
///
/// Candidate filenames are the original plus the `.rar`-substituted form;
/// directories are tested in configuration order and the first regular file
/// wins. Missing files advance silently, other I/O failures are recorded.
async fn local_check(
    config: &TriageConfig,
    doc: &nzb::NzbDocument,
    candidates: &[usize],
    findings: &mut Findings,
) {
    for &idx in candidates {
        let file = &doc.files[idx];
        let Some(name) = file.filename.as_deref() else {
            findings.record(file_finding(
                FindingSource::Local,
                file,
                FindingStatus::MissingFilename,
                None,
            ));
            continue;
        };

        let mut names = vec![name.to_string()];
        let canonical = nzb::canonical_archive_key(name);
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&canonical)) {
            names.push(canonical);
        }

        'dirs: for dir in &config.archive_dirs {
            for candidate_name in &names {
                let path = dir.join(candidate_name);
                match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => {
                        match read_prefix(&path).await {
                            Ok(buf) => {
                                let inspection = inspect::inspect_prefix(&buf);
                                findings.record(inspection_finding(
                                    FindingSource::Local,
                                    file,
                                    inspection,
                                    Some(path),
                                ));
                            }
                            Err(e) => {
                                findings.record(ArchiveFinding {
                                    source: FindingSource::Local,
                                    filename: file.filename.clone(),
                                    subject: Some(file.subject.clone()),
                                    status: FindingStatus::IoError,
                                    details: Some(e.to_string()),
                                    path: Some(path),
                                });
                            }
                        }
                        break 'dirs;
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        findings.record(ArchiveFinding {
                            source: FindingSource::Local,
                            filename: file.filename.clone(),
                            subject: Some(file.subject.clone()),
                            status: FindingStatus::IoError,
                            details: Some(e.to_string()),
                            path: Some(path),
                        });
                    }
                }
            }
        }
    }
}

async fn read_prefix(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut buf = Vec::with_capacity(LOCAL_READ_LIMIT as usize);
    file.take(LOCAL_READ_LIMIT).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Remote probe: STAT + BODY + header inspection on the primary archive,
/// then broadened STAT sampling once a stored archive is confirmed.
async fn remote_check(
    config: &TriageConfig,
    pool: &Arc<NntpPool>,
    doc: &nzb::NzbDocument,
    candidates: &[usize],
    findings: &mut Findings,
) {
    let Some(&first) = candidates.first() else {
        findings.record(ArchiveFinding {
            source: FindingSource::Nntp,
            filename: None,
            subject: None,
            status: FindingStatus::ArchiveNotFound,
            details: None,
            path: None,
        });
        return;
    };
    let Some(primary_idx) = candidates
        .iter()
        .copied()
        .find(|&i| !doc.files[i].segments.is_empty())
    else {
        findings.record(file_finding(
            FindingSource::Nntp,
            &doc.files[first],
            FindingStatus::ArchiveNoSegments,
            None,
        ));
        return;
    };
    let primary = &doc.files[primary_idx];
    let mut lease = Lease::new(pool);

    let first_id = primary.segments[0].message_id.clone();
    match lease.stat(&first_id).await {
        Ok(()) => match lease.body(&first_id).await {
            Ok(raw) => match yenc::decode_prefix(&raw, config.max_decoded_bytes) {
                Ok(decoded) => {
                    let inspection = inspect::inspect_prefix(&decoded);
                    findings.record(inspection_finding(
                        FindingSource::Nntp,
                        primary,
                        inspection,
                        None,
                    ));
                }
                Err(e) => {
                    findings.record(file_finding(
                        FindingSource::Nntp,
                        primary,
                        FindingStatus::DecodeError,
                        Some(e.message),
                    ));
                }
            },
            Err(e) => {
                let status = if e.kind == ErrorKind::BodyMissing {
                    FindingStatus::BodyMissing
                } else {
                    FindingStatus::BodyError
                };
                findings.record(file_finding(
                    FindingSource::Nntp,
                    primary,
                    status,
                    Some(e.message),
                ));
            }
        },
        Err(e) => {
            let status = if e.kind == ErrorKind::StatMissing {
                FindingStatus::StatMissing
            } else {
                FindingStatus::StatError
            };
            findings.record(file_finding(
                FindingSource::Nntp,
                primary,
                status,
                Some(e.message),
            ));
        }
    }

    // Broaden liveness evidence only when the archive looks streamable
    if findings.stored_confirmed && findings.blockers.is_empty() {
        let extra = config.stat_sample_count.saturating_sub(1);
        if extra > 0 && primary.segments.len() > 1 {
            let sampled: Vec<&nzb::NzbSegment> = primary.segments[1..]
                .choose_multiple(&mut rand::thread_rng(), extra)
                .collect();
            for segment in sampled {
                findings.record(
                    stat_probe_finding(&mut lease, primary, &segment.message_id).await,
                );
            }
        }

        let others: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| i != primary_idx && !doc.files[i].segments.is_empty())
            .take(config.archive_sample_count)
            .collect();
        for idx in others {
            let file = &doc.files[idx];
            let message_id = file.segments[0].message_id.clone();
            findings.record(stat_probe_finding(&mut lease, file, &message_id).await);
        }
    }

    lease.release().await;
}

/// A pool borrow that lazily acquires, drops poisoned clients on the spot,
/// and re-acquires for the next operation.
struct Lease<'a> {
    pool: &'a NntpPool,
    client: Option<PooledClient>,
}

impl<'a> Lease<'a> {
    fn new(pool: &'a NntpPool) -> Self {
        Self { pool, client: None }
    }

    async fn client(&mut self) -> std::result::Result<&mut PooledClient, NntpError> {
        if self.client.is_none() {
            self.client = Some(self.pool.acquire().await?);
        }
        match self.client.as_mut() {
            Some(client) => Ok(client),
            None => Err(NntpError::new(
                ErrorKind::Econnaborted,
                "NNTP client unavailable",
            )),
        }
    }

    async fn stat(&mut self, message_id: &str) -> std::result::Result<(), NntpError> {
        let result = self.client().await?.stat(message_id).await;
        self.drop_if_poisoned(&result).await;
        result
    }

    async fn body(&mut self, message_id: &str) -> std::result::Result<Vec<u8>, NntpError> {
        let result = self.client().await?.body(message_id).await;
        self.drop_if_poisoned(&result).await;
        result
    }

    async fn drop_if_poisoned<T>(&mut self, result: &std::result::Result<T, NntpError>) {
        if let Err(e) = result {
            if e.drop_client {
                if let Some(client) = self.client.take() {
                    self.pool.release(client, true).await;
                }
            }
        }
    }

    async fn release(mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client, false).await;
        }
    }
}
