//! Error types for nzb-triage
//!
//! This module provides error handling for the library:
//! - The closed set of machine-readable error codes ([`ErrorKind`])
//! - The tagged NNTP error carrying the client-drop flag ([`NntpError`])
//! - The top-level [`Error`] enum used by fallible internal operations
//!
//! The engine's public entry points never propagate errors to the caller;
//! failures are folded into per-candidate summaries.

use thiserror::Error;

/// Result type alias for nzb-triage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error codes surfaced in findings and warnings.
///
/// This is a closed set: every failure the engine reports maps onto one of
/// these codes, so consumers can switch on `as_code()` without string parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// STAT returned 430 (article not found)
    StatMissing,
    /// STAT exceeded its hard per-call timeout
    StatTimeout,
    /// BODY returned 430 (article not found)
    BodyMissing,
    /// BODY failed or returned an empty body
    BodyError,
    /// yEnc decode produced zero output bytes
    DecodeError,
    /// Analyzer batch deadline expired
    HealthcheckTimeout,
    /// Runner time budget expired
    TriageTimeout,
    /// Transport-level timeout
    Etimedout,
    /// Transport connection reset
    Econnreset,
    /// Transport connection aborted
    Econnaborted,
    /// Transport broken pipe
    Epipe,
    /// Catch-all for unexpected per-NZB analysis failures
    AnalysisError,
}

impl ErrorKind {
    /// The wire-stable code string for this kind
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::StatMissing => "STAT_MISSING",
            ErrorKind::StatTimeout => "STAT_TIMEOUT",
            ErrorKind::BodyMissing => "BODY_MISSING",
            ErrorKind::BodyError => "BODY_ERROR",
            ErrorKind::DecodeError => "DECODE_ERROR",
            ErrorKind::HealthcheckTimeout => "HEALTHCHECK_TIMEOUT",
            ErrorKind::TriageTimeout => "TRIAGE_TIMEOUT",
            ErrorKind::Etimedout => "ETIMEDOUT",
            ErrorKind::Econnreset => "ECONNRESET",
            ErrorKind::Econnaborted => "ECONNABORTED",
            ErrorKind::Epipe => "EPIPE",
            ErrorKind::AnalysisError => "analysis-error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// NNTP-layer error
///
/// The `drop_client` flag is a first-class part of the pool release contract:
/// a transport-fatal failure (timeout, reset, broken pipe) poisons the
/// connection and the client must be dropped and replaced, while a missing
/// article (430) is a well-defined outcome on a healthy connection.
#[derive(Debug, Error)]
#[error("NNTP {kind}: {message}")]
pub struct NntpError {
    /// Machine-readable code for this failure
    pub kind: ErrorKind,
    /// Whether the client that produced this error must be dropped from the pool
    pub drop_client: bool,
    /// Human-readable detail
    pub message: String,
}

impl NntpError {
    /// Build an error with an explicit kind; `drop_client` defaults off.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            drop_client: false,
            message: message.into(),
        }
    }

    /// Mark this error as fatal for the client that produced it.
    pub fn dropping(mut self) -> Self {
        self.drop_client = true;
        self
    }

    /// Article-not-found outcome for STAT (never drops the client).
    pub fn stat_missing(message_id: &str) -> Self {
        Self::new(
            ErrorKind::StatMissing,
            format!("no such article: {}", message_id),
        )
    }

    /// Article-not-found outcome for BODY (never drops the client).
    pub fn body_missing(message_id: &str) -> Self {
        Self::new(
            ErrorKind::BodyMissing,
            format!("no such article: {}", message_id),
        )
    }

    /// Map a transport I/O failure onto the closed transport-code set.
    ///
    /// Every transport failure poisons the connection, so these all set
    /// `drop_client`.
    pub fn from_io(e: &std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Etimedout,
            std::io::ErrorKind::ConnectionReset => ErrorKind::Econnreset,
            std::io::ErrorKind::ConnectionAborted => ErrorKind::Econnaborted,
            std::io::ErrorKind::BrokenPipe => ErrorKind::Epipe,
            _ => ErrorKind::Econnreset,
        };
        Self::new(kind, e.to_string()).dropping()
    }
}

/// Main error type for nzb-triage
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "nntp.host")
        key: Option<String>,
    },

    /// NNTP protocol, transport, or pool error
    #[error("NNTP error: {0}")]
    Nntp(#[from] NntpError),

    /// Invalid NZB document
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error (NZB payload fetch)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The machine-readable code for this error, used in `code:<errcode>`
    /// warnings on rejected NZBs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config-error",
            Error::Nntp(e) => e.kind.as_code(),
            Error::InvalidNzb(_) => "invalid-nzb",
            Error::Io(_) => "io-error",
            Error::Network(_) => "network-error",
            Error::Serialization(_) => "serialization-error",
            Error::Other(_) => "analysis-error",
        }
    }
}
