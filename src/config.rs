//! Configuration types for nzb-triage

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// NNTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NntpConfig {
    /// Server hostname
    pub host: String,

    /// Server port (typically 119 for unencrypted, 563 for TLS)
    #[serde(default = "default_nntp_port")]
    pub port: u16,

    /// Username for authentication
    #[serde(default)]
    pub user: Option<String>,

    /// Password for authentication
    #[serde(default)]
    pub pass: Option<String>,

    /// Use TLS (implicit TLS, not STARTTLS)
    #[serde(default)]
    pub use_tls: bool,

    /// Connect + greeting + auth timeout in milliseconds (default: 30000)
    #[serde(default)]
    pub conn_timeout_ms: Option<u64>,
}

impl NntpConfig {
    /// Effective connect timeout
    pub fn conn_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.conn_timeout_ms.unwrap_or(30_000))
    }
}

/// Analyzer and pool configuration
///
/// Fields mirror the recognized keys of the triage options record; unknown
/// keys are ignored on deserialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Local directories an already-downloaded archive may be found in
    #[serde(default)]
    pub archive_dirs: Vec<PathBuf>,

    /// NNTP server to probe against; None disables all remote checks
    #[serde(default)]
    pub nntp: Option<NntpConfig>,

    /// Deadline for one analyzer batch in milliseconds (default: 35000)
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// Cap on decoded bytes handed to the archive inspector (default: 16384)
    #[serde(default = "default_max_decoded_bytes")]
    pub max_decoded_bytes: usize,

    /// NNTP pool size (default: 60)
    #[serde(default = "default_nntp_max_connections")]
    pub nntp_max_connections: usize,

    /// Reuse the shared pool across batches when the key matches (default: true)
    #[serde(default = "default_true")]
    pub reuse_nntp_pool: bool,

    /// Proactive idle-rotation interval in milliseconds (default: 120000)
    #[serde(default = "default_nntp_keep_alive_ms")]
    pub nntp_keep_alive_ms: u64,

    /// Cap on concurrently analyzed NZBs; None means one worker per NZB
    #[serde(default)]
    pub max_parallel_nzbs: Option<usize>,

    /// Segments sampled per NZB for liveness STATs (default: 1)
    #[serde(default = "default_stat_sample_count")]
    pub stat_sample_count: usize,

    /// Additional archive candidates sampled after a stored confirmation (default: 1)
    #[serde(default = "default_archive_sample_count")]
    pub archive_sample_count: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            archive_dirs: Vec::new(),
            nntp: None,
            health_check_timeout_ms: default_health_check_timeout_ms(),
            max_decoded_bytes: default_max_decoded_bytes(),
            nntp_max_connections: default_nntp_max_connections(),
            reuse_nntp_pool: default_true(),
            nntp_keep_alive_ms: default_nntp_keep_alive_ms(),
            max_parallel_nzbs: None,
            stat_sample_count: default_stat_sample_count(),
            archive_sample_count: default_archive_sample_count(),
        }
    }
}

/// Runner configuration: ranking, fetching, and budget accounting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Total wall-clock budget for a triage run in milliseconds (default: 12000)
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,

    /// Cap on candidates kept after ranking and dedupe (default: 25)
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Parallel NZB payload downloads (default: 8)
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// Per-request NZB download timeout in milliseconds (default: 10000)
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,

    /// Rank candidates by proximity to this size instead of descending size
    #[serde(default)]
    pub preferred_size_bytes: Option<u64>,

    /// Indexer ids/names whose candidates rank ahead of all others
    #[serde(default)]
    pub preferred_indexer_ids: Vec<String>,

    /// Analyzer and pool options
    #[serde(default)]
    pub triage: TriageConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: default_time_budget_ms(),
            max_candidates: default_max_candidates(),
            download_concurrency: default_download_concurrency(),
            download_timeout_ms: default_download_timeout_ms(),
            preferred_size_bytes: None,
            preferred_indexer_ids: Vec::new(),
            triage: TriageConfig::default(),
        }
    }
}

fn default_nntp_port() -> u16 {
    119
}

fn default_health_check_timeout_ms() -> u64 {
    35_000
}

fn default_max_decoded_bytes() -> usize {
    16_384
}

fn default_nntp_max_connections() -> usize {
    60
}

fn default_true() -> bool {
    true
}

fn default_nntp_keep_alive_ms() -> u64 {
    120_000
}

fn default_stat_sample_count() -> usize {
    1
}

fn default_archive_sample_count() -> usize {
    1
}

fn default_time_budget_ms() -> u64 {
    12_000
}

fn default_max_candidates() -> usize {
    25
}

fn default_download_concurrency() -> usize {
    8
}

fn default_download_timeout_ms() -> u64 {
    10_000
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_keys() {
        let cfg = TriageConfig::default();
        assert_eq!(cfg.health_check_timeout_ms, 35_000);
        assert_eq!(cfg.max_decoded_bytes, 16_384);
        assert_eq!(cfg.nntp_max_connections, 60);
        assert!(cfg.reuse_nntp_pool);
        assert_eq!(cfg.nntp_keep_alive_ms, 120_000);
        assert_eq!(cfg.stat_sample_count, 1);
        assert_eq!(cfg.archive_sample_count, 1);

        let run = RunnerConfig::default();
        assert_eq!(run.time_budget_ms, 12_000);
        assert_eq!(run.max_candidates, 25);
        assert_eq!(run.download_concurrency, 8);
        assert_eq!(run.download_timeout_ms, 10_000);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg: TriageConfig = serde_json::from_str(
            r#"{"statSampleCount": 3, "bogusKey": true}"#,
        )
        .unwrap();
        // serde is snake_case here; camelCase keys fall through to defaults
        assert_eq!(cfg.stat_sample_count, 1);
        let cfg: TriageConfig =
            serde_json::from_str(r#"{"stat_sample_count": 3, "bogus_key": true}"#).unwrap();
        assert_eq!(cfg.stat_sample_count, 3);
    }

    #[test]
    fn nntp_conn_timeout_default() {
        let cfg = NntpConfig {
            host: "news.example.com".to_string(),
            port: 563,
            user: None,
            pass: None,
            use_tls: true,
            conn_timeout_ms: None,
        };
        assert_eq!(cfg.conn_timeout(), std::time::Duration::from_secs(30));
    }
}
