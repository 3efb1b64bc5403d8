//! Shared test doubles: scripted NNTP clients, connectors, and fetchers.

use crate::error::{ErrorKind, NntpError};
use crate::fetch::{FetchError, NzbFetcher};
use crate::nntp::connection::{NntpClient, NntpConnector};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted remote state for mock NNTP sessions.
///
/// Segments default to present; bodies default to absent.
#[derive(Clone, Default)]
pub(crate) struct MockScript {
    stat: HashMap<String, SegmentState>,
    bodies: HashMap<String, Vec<u8>>,
    fail_connects_after: Option<usize>,
    keepalive_fails: bool,
    stat_delay: Option<Duration>,
}

/// Existence of one scripted segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SegmentState {
    /// STAT answers 223
    Present,
    /// STAT answers 430
    Missing,
    /// STAT fails with a transport error
    Broken,
}

impl MockScript {
    pub(crate) fn with_stat(mut self, message_id: &str, state: SegmentState) -> Self {
        self.stat.insert(message_id.to_string(), state);
        self
    }

    pub(crate) fn with_body(mut self, message_id: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(message_id.to_string(), body);
        self
    }

    /// Accept the first `n` connects, fail the rest.
    pub(crate) fn fail_connects_after(mut self, n: usize) -> Self {
        self.fail_connects_after = Some(n);
        self
    }

    /// Make keep-alive probes fail with a transport error.
    pub(crate) fn stat_error_for_keepalive(mut self) -> Self {
        self.keepalive_fails = true;
        self
    }

    /// Delay every regular STAT, for deadline tests under a paused clock.
    pub(crate) fn with_stat_delay(mut self, delay: Duration) -> Self {
        self.stat_delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct MockCounters {
    connects: AtomicUsize,
    quits: AtomicUsize,
    stats: AtomicUsize,
    bodies: AtomicUsize,
    keepalive_stats: AtomicUsize,
}

/// Connector producing scripted [`MockClient`]s and counting traffic.
pub(crate) struct MockConnector {
    script: MockScript,
    counters: Arc<MockCounters>,
}

impl MockConnector {
    pub(crate) fn new(script: MockScript) -> Self {
        Self {
            script,
            counters: Arc::new(MockCounters::default()),
        }
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn quit_count(&self) -> usize {
        self.counters.quits.load(Ordering::SeqCst)
    }

    pub(crate) fn stat_count(&self) -> usize {
        self.counters.stats.load(Ordering::SeqCst)
    }

    pub(crate) fn body_count(&self) -> usize {
        self.counters.bodies.load(Ordering::SeqCst)
    }

    pub(crate) fn keepalive_stats(&self) -> usize {
        self.counters.keepalive_stats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NntpConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn NntpClient>, NntpError> {
        let attempt = self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.script.fail_connects_after {
            if attempt >= limit {
                return Err(NntpError::new(
                    ErrorKind::Econnreset,
                    "mock connect refused",
                )
                .dropping());
            }
        }
        Ok(Box::new(MockClient {
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

pub(crate) struct MockClient {
    script: MockScript,
    counters: Arc<MockCounters>,
}

fn bare_id(message_id: &str) -> &str {
    message_id
        .trim_start_matches('<')
        .trim_end_matches('>')
}

#[async_trait]
impl NntpClient for MockClient {
    async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
        let id = bare_id(message_id);
        if id.starts_with("keepalive-") {
            self.counters.keepalive_stats.fetch_add(1, Ordering::SeqCst);
            if self.script.keepalive_fails {
                return Err(NntpError::new(
                    ErrorKind::Etimedout,
                    "mock keep-alive failure",
                )
                .dropping());
            }
            // A healthy probe on a synthetic id answers 430
            return Err(NntpError::stat_missing(message_id));
        }
        self.counters.stats.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.script.stat_delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.stat.get(id).copied() {
            None | Some(SegmentState::Present) => Ok(()),
            Some(SegmentState::Missing) => Err(NntpError::stat_missing(message_id)),
            Some(SegmentState::Broken) => Err(NntpError::new(
                ErrorKind::Econnreset,
                "mock transport failure",
            )
            .dropping()),
        }
    }

    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        self.counters.bodies.fetch_add(1, Ordering::SeqCst);
        let id = bare_id(message_id);
        if let Some(body) = self.script.bodies.get(id) {
            return Ok(body.clone());
        }
        match self.script.stat.get(id).copied() {
            Some(SegmentState::Missing) => Err(NntpError::body_missing(message_id)),
            _ => Err(NntpError::new(
                ErrorKind::BodyError,
                format!("no scripted body for {}", message_id),
            )),
        }
    }

    async fn quit(&mut self) {
        self.counters.quits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted [`NzbFetcher`]: url -> payload or failure message.
#[derive(Default)]
pub(crate) struct MockFetcher {
    responses: HashMap<String, Result<String, String>>,
    delay: Option<Duration>,
    requests: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn with_payload(mut self, url: &str, payload: &str) -> Self {
        self.responses
            .insert(url.to_string(), Ok(payload.to_string()));
        self
    }

    pub(crate) fn with_failure(mut self, url: &str, message: &str) -> Self {
        self.responses
            .insert(url.to_string(), Err(message.to_string()));
        self
    }

    /// Delay every fetch, for budget-expiry tests.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NzbFetcher for MockFetcher {
    async fn fetch_nzb(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.get(url) {
            Some(Ok(payload)) => Ok(payload.clone()),
            Some(Err(message)) => Err(FetchError::new(message.clone())),
            None => Err(FetchError::new(format!("no scripted response for {}", url))),
        }
    }
}

/// Build a minimal RAR4 volume: signature, main header, one file header.
pub(crate) fn rar4_volume(flags: u16, method: u8, name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00]);

    // MAIN_HEAD (type 0x73), 13 bytes
    buf.extend_from_slice(&[0x00, 0x00, 0x73, 0x00, 0x00]);
    buf.extend_from_slice(&13u16.to_le_bytes());
    buf.extend_from_slice(&[0u8; 6]);

    // FILE_HEAD (type 0x74): 32 fixed bytes + name
    let head_size = 32 + name.len() as u16;
    buf.extend_from_slice(&[0x00, 0x00, 0x74]);
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&head_size.to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]); // pack size
    buf.extend_from_slice(&[0u8; 4]); // unpack size
    buf.push(0x00); // host os
    buf.extend_from_slice(&[0u8; 4]); // crc
    buf.extend_from_slice(&[0u8; 4]); // ftime
    buf.push(0x1d); // unpack version
    buf.push(method);
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(&[0u8; 4]); // attributes
    buf.extend_from_slice(name);
    buf
}

/// Render an NZB document from (subject, segment ids) pairs.
pub(crate) fn nzb_xml(title: Option<&str>, files: &[(&str, &[&str])]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<nzb>\n");
    if let Some(title) = title {
        xml.push_str(&format!(
            "  <head><meta type=\"title\">{}</meta></head>\n",
            title
        ));
    }
    for (subject, segment_ids) in files {
        xml.push_str(&format!("  <file subject='{}'>\n    <segments>\n", subject));
        for (i, id) in segment_ids.iter().enumerate() {
            xml.push_str(&format!(
                "      <segment bytes=\"768000\" number=\"{}\">{}</segment>\n",
                i + 1,
                id
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }
    xml.push_str("</nzb>\n");
    xml
}

/// Wrap a yEnc-encoded article body around `plain` the way a posting agent
/// would, so BODY probes exercise the real decoder.
pub(crate) fn yenc_article(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"=ybegin line=128 size=");
    out.extend_from_slice(plain.len().to_string().as_bytes());
    out.extend_from_slice(b" name=probe.bin\r\n");
    for &b in plain {
        let enc = b.wrapping_add(42);
        if enc == 0x00 || enc == 0x0A || enc == 0x0D || enc == b'=' {
            out.push(b'=');
            out.push(enc.wrapping_add(64));
        } else {
            out.push(enc);
        }
    }
    out.extend_from_slice(b"\r\n=yend size=");
    out.extend_from_slice(plain.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}
