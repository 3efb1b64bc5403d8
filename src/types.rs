//! Core types for nzb-triage

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::PathBuf;

/// One NZB competing for a release, as produced by an indexer search.
///
/// Identity within a batch is the `download_url`; candidates without one are
/// dropped before ranking.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NzbCandidate {
    /// URL the NZB payload can be fetched from (unique within a batch)
    pub download_url: String,
    /// Release title as reported by the indexer
    #[serde(default)]
    pub title: Option<String>,
    /// Stable indexer identifier
    #[serde(default)]
    pub indexer_id: Option<String>,
    /// Human-readable indexer name
    #[serde(default)]
    pub indexer_name: Option<String>,
    /// Reported payload size in bytes
    #[serde(default)]
    pub size: u64,
}

/// Which probe produced a finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingSource {
    /// Local archive-directory lookup
    Local,
    /// Remote STAT + BODY + header inspection
    Nntp,
    /// Remote STAT-only liveness sampling
    NntpStat,
}

/// Terminal status of a single probe against one archive file or segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingStatus {
    /// RAR4 volume whose first file entry is stored (method 0x30)
    RarStored,
    /// 7z archive whose header probe indicates no coder chain
    SevenzipStored,
    /// RAR4 file entry uses a compression method
    RarCompressed,
    /// RAR4 file entry is encrypted
    RarEncrypted,
    /// RAR4 file entry is part of a solid chain
    RarSolid,
    /// RAR5 volume the inspector declines to parse
    Rar5Unsupported,
    /// 7z archive with a non-copy coder byte
    SevenzipUnsupported,
    /// No RAR file header before data exhaustion, or unrecognized signature
    RarHeaderNotFound,
    /// RAR block header extends past the available bytes
    RarInsufficientData,
    /// RAR block header with an impossible size
    RarCorruptHeader,
    /// 7z signature present but fewer than 32 bytes available
    SevenzipInsufficientData,
    /// STAT returned 430 for the probed segment
    StatMissing,
    /// STAT failed for a reason other than 430
    StatError,
    /// BODY returned 430 for the probed segment
    BodyMissing,
    /// BODY failed or returned an empty body
    BodyError,
    /// yEnc decode of the fetched body produced no bytes
    DecodeError,
    /// Liveness STAT succeeded
    SegmentOk,
    /// Liveness STAT returned 430
    SegmentMissing,
    /// Liveness STAT failed for a reason other than 430
    SegmentError,
    /// No archive candidate was available to probe
    ArchiveNotFound,
    /// The probed archive candidate has no segments
    ArchiveNoSegments,
    /// Local filesystem error other than a missing file
    IoError,
    /// File record had no derivable filename
    MissingFilename,
}

impl FindingStatus {
    /// The kebab-case status string used in blockers and warnings
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::RarStored => "rar-stored",
            FindingStatus::SevenzipStored => "sevenzip-stored",
            FindingStatus::RarCompressed => "rar-compressed",
            FindingStatus::RarEncrypted => "rar-encrypted",
            FindingStatus::RarSolid => "rar-solid",
            FindingStatus::Rar5Unsupported => "rar5-unsupported",
            FindingStatus::SevenzipUnsupported => "sevenzip-unsupported",
            FindingStatus::RarHeaderNotFound => "rar-header-not-found",
            FindingStatus::RarInsufficientData => "rar-insufficient-data",
            FindingStatus::RarCorruptHeader => "rar-corrupt-header",
            FindingStatus::SevenzipInsufficientData => "sevenzip-insufficient-data",
            FindingStatus::StatMissing => "stat-missing",
            FindingStatus::StatError => "stat-error",
            FindingStatus::BodyMissing => "body-missing",
            FindingStatus::BodyError => "body-error",
            FindingStatus::DecodeError => "decode-error",
            FindingStatus::SegmentOk => "segment-ok",
            FindingStatus::SegmentMissing => "segment-missing",
            FindingStatus::SegmentError => "segment-error",
            FindingStatus::ArchiveNotFound => "archive-not-found",
            FindingStatus::ArchiveNoSegments => "archive-no-segments",
            FindingStatus::IoError => "io-error",
            FindingStatus::MissingFilename => "missing-filename",
        }
    }

    /// Whether this status confirms a stored (stream-ready) archive
    pub fn is_stored(&self) -> bool {
        matches!(self, FindingStatus::RarStored | FindingStatus::SevenzipStored)
    }

    /// Whether this status counts as positive evidence for `verified`
    pub fn is_positive(&self) -> bool {
        self.is_stored() || matches!(self, FindingStatus::SegmentOk)
    }
}

impl std::fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one probe, recorded on the NZB decision
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveFinding {
    /// Which probe produced this finding
    pub source: FindingSource,
    /// Filename of the probed file, when derivable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Subject of the probed file record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Terminal status of the probe
    pub status: FindingStatus,
    /// Extra detail (method byte, error message, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Local path the archive was found at, for local findings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Accept/reject verdict for one NZB
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// No blockers were recorded
    Accept,
    /// At least one blocker was recorded
    Reject,
}

/// Analyzer output for one NZB
///
/// Invariant: `decision == Accept` exactly when `blockers` is empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NzbDecision {
    /// Accept/reject verdict
    pub decision: Decision,
    /// Conditions that make the NZB unstreamable
    pub blockers: BTreeSet<String>,
    /// Degraded-confidence conditions that do not block
    pub warnings: BTreeSet<String>,
    /// Number of file records in the NZB
    pub file_count: usize,
    /// Title from the NZB head metadata, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nzb_title: Option<String>,
    /// Position of this NZB in the analyzer input batch
    pub nzb_index: usize,
    /// All probe findings recorded during analysis
    pub archive_findings: Vec<ArchiveFinding>,
}

/// Terminal status of one candidate in the runner report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateStatus {
    /// Accepted with positive stored/liveness evidence
    Verified,
    /// Accepted without positive evidence
    Unverified,
    /// Rejected by the analyzer
    Blocked,
    /// The NZB payload fetch itself failed
    FetchError,
    /// Never reached (budget exhausted before fetch, or no payload)
    Skipped,
    /// The overall triage timed out before this candidate was decided
    Pending,
    /// Internal failure while assembling this candidate's summary
    Error,
}

impl CandidateStatus {
    /// The kebab-case status string
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Verified => "verified",
            CandidateStatus::Unverified => "unverified",
            CandidateStatus::Blocked => "blocked",
            CandidateStatus::FetchError => "fetch-error",
            CandidateStatus::Skipped => "skipped",
            CandidateStatus::Pending => "pending",
            CandidateStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-candidate triage summary, keyed by download URL in the report
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    /// Terminal status for this candidate
    pub status: CandidateStatus,
    /// Blockers carried over from the decision (or the fetch failure)
    pub blockers: BTreeSet<String>,
    /// Warnings carried over from the decision
    pub warnings: BTreeSet<String>,
    /// Analyzer batch index, when the candidate was analyzed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nzb_index: Option<usize>,
    /// File count from the parsed NZB, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    /// All probe findings for this candidate
    pub archive_findings: Vec<ArchiveFinding>,
    /// Candidate title as provided by the indexer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Lowercased, trimmed title used for batch dedupe
    pub normalized_title: String,
    /// Originating indexer id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexer_id: Option<String>,
    /// Originating indexer name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexer_name: Option<String>,
}

/// Full output of one triage run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageReport {
    /// Per-candidate summaries keyed by download URL
    pub decisions: HashMap<String, CandidateSummary>,
    /// Wall-clock duration of the run in milliseconds
    pub elapsed_ms: u64,
    /// Whether any deadline (budget or analyzer) expired during the run
    pub timed_out: bool,
    /// Number of candidates that survived ranking and dedupe
    pub candidates_considered: usize,
    /// Number of NZBs the analyzer produced a decision for
    pub evaluated_count: usize,
    /// Number of NZB payload fetches that failed
    pub fetch_failures: usize,
    /// One-line human-readable digest of the batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Normalize a candidate title for dedupe: lowercased and trimmed.
///
/// Titles that normalize to the empty string never collide.
pub fn normalize_title(title: Option<&str>) -> String {
    title.map(|t| t.trim().to_lowercase()).unwrap_or_default()
}
