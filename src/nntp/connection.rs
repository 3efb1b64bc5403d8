//! NNTP wire transport and the capability traits the pool drives.
//!
//! The protocol surface is the RFC 3977 subset triage needs: AUTHINFO on
//! connect, `STAT` and `BODY` by message-id, `QUIT` on close. Everything else
//! (article numbers, GROUP state, pipelining) is out of scope.

use crate::config::NntpConfig;
use crate::error::{ErrorKind, NntpError};
use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsConnector;

/// Hard per-call STAT timeout; expiry poisons the client.
pub(crate) const STAT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait for the QUIT acknowledgement before giving up.
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// One authenticated NNTP session.
///
/// Implementations are stateful and not safe for concurrent commands; the
/// pool guarantees exclusive access while a client is lent out.
#[async_trait]
pub trait NntpClient: Send {
    /// Probe article existence. `Ok(())` means the article exists.
    async fn stat(&mut self, message_id: &str) -> Result<(), NntpError>;

    /// Fetch an article body (yEnc-encoded payload, dot-stuffing removed).
    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError>;

    /// Close the session gracefully. Errors are ignored.
    async fn quit(&mut self);
}

/// Capability that opens authenticated NNTP sessions.
#[async_trait]
pub trait NntpConnector: Send + Sync {
    /// Open one authenticated session.
    async fn connect(&self) -> Result<Box<dyn NntpClient>, NntpError>;
}

/// Wrap a message-id in angle brackets for the wire, unless already wrapped.
pub(crate) fn wire_message_id(message_id: &str) -> Cow<'_, str> {
    if message_id.starts_with('<') {
        Cow::Borrowed(message_id)
    } else {
        Cow::Owned(format!("<{}>", message_id))
    }
}

/// TCP/TLS implementation of [`NntpClient`].
pub struct NntpConnection {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
}

impl NntpConnection {
    async fn send_command(&mut self, command: &str) -> Result<(), NntpError> {
        self.writer
            .write_all(command.as_bytes())
            .await
            .map_err(|e| NntpError::from_io(&e))?;
        self.writer
            .write_all(b"\r\n")
            .await
            .map_err(|e| NntpError::from_io(&e))?;
        self.writer.flush().await.map_err(|e| NntpError::from_io(&e))
    }

    async fn read_response(&mut self) -> Result<String, NntpError> {
        let mut response = String::new();
        let n = self
            .reader
            .read_line(&mut response)
            .await
            .map_err(|e| NntpError::from_io(&e))?;
        if n == 0 {
            return Err(NntpError::new(
                ErrorKind::Econnreset,
                "connection closed by server",
            )
            .dropping());
        }
        while response.ends_with('\n') || response.ends_with('\r') {
            response.pop();
        }
        Ok(response)
    }

    /// Read a dot-terminated multiline body, removing dot-stuffing.
    ///
    /// Line terminators are normalized to `\n`, which is what the yEnc
    /// decoder splits on.
    async fn read_body(&mut self) -> Result<Vec<u8>, NntpError> {
        let mut body = Vec::with_capacity(256 * 1024);
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| NntpError::from_io(&e))?;
            if n == 0 {
                return Err(NntpError::new(
                    ErrorKind::Econnreset,
                    "connection closed mid-body",
                )
                .dropping());
            }
            if line == b".\r\n" || line == b".\n" {
                break;
            }
            // Dot-stuffing: leading ".." collapses to "."
            let mut slice: &[u8] = &line;
            if slice.starts_with(b"..") {
                slice = &slice[1..];
            }
            let slice = slice
                .strip_suffix(b"\r\n")
                .or_else(|| slice.strip_suffix(b"\n"))
                .unwrap_or(slice);
            body.extend_from_slice(slice);
            body.push(b'\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl NntpClient for NntpConnection {
    async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
        let id = wire_message_id(message_id);
        let op = async {
            self.send_command(&format!("STAT {}", id)).await?;
            self.read_response().await
        };
        let response = match timeout(STAT_TIMEOUT, op).await {
            Ok(r) => r?,
            Err(_) => {
                return Err(NntpError::new(
                    ErrorKind::StatTimeout,
                    format!("STAT {} timed out", id),
                )
                .dropping());
            }
        };
        if response.starts_with("223") {
            Ok(())
        } else if response.starts_with("430") || response.contains("430") {
            Err(NntpError::stat_missing(&id))
        } else {
            // 400/500 series: the session state is no longer trustworthy
            Err(NntpError::new(
                ErrorKind::Econnaborted,
                format!("unexpected STAT response: {}", response),
            )
            .dropping())
        }
    }

    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        let id = wire_message_id(message_id);
        self.send_command(&format!("BODY {}", id)).await?;
        let response = self.read_response().await?;
        if response.starts_with("430") || response.contains("430") {
            return Err(NntpError::body_missing(&id));
        }
        if !response.starts_with("222") {
            return Err(NntpError::new(
                ErrorKind::Econnaborted,
                format!("unexpected BODY response: {}", response),
            )
            .dropping());
        }
        let body = self.read_body().await?;
        if body.is_empty() {
            return Err(NntpError::new(
                ErrorKind::BodyError,
                format!("empty body for {}", id),
            ));
        }
        Ok(body)
    }

    async fn quit(&mut self) {
        let _ = self.send_command("QUIT").await;
        let _ = timeout(QUIT_TIMEOUT, self.read_response()).await;
    }
}

/// [`NntpConnector`] over TCP with optional implicit TLS.
///
/// The TLS connector is built once and shared so the session cache is reused
/// across the pool's connections.
pub struct TcpNntpConnector {
    config: NntpConfig,
    tls: Option<Arc<TlsConnector>>,
}

impl TcpNntpConnector {
    /// Build a connector for one server configuration.
    pub fn new(config: NntpConfig) -> Result<Self, NntpError> {
        let tls = if config.use_tls {
            let native = native_tls::TlsConnector::builder().build().map_err(|e| {
                NntpError::new(ErrorKind::Econnaborted, format!("TLS setup failed: {}", e))
                    .dropping()
            })?;
            Some(Arc::new(TlsConnector::from(native)))
        } else {
            None
        };
        Ok(Self { config, tls })
    }

    async fn open_stream(&self) -> Result<NntpConnection, NntpError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| NntpError::from_io(&e))?;
        tcp.set_nodelay(true).map_err(|e| NntpError::from_io(&e))?;

        let (reader, writer): (
            Box<dyn AsyncRead + Unpin + Send>,
            Box<dyn AsyncWrite + Unpin + Send>,
        ) = if let Some(tls) = &self.tls {
            let stream = tls
                .connect(&self.config.host, tcp)
                .await
                .map_err(|e| {
                    NntpError::new(
                        ErrorKind::Econnaborted,
                        format!("TLS handshake with {} failed: {}", addr, e),
                    )
                    .dropping()
                })?;
            let (r, w) = tokio::io::split(stream);
            (Box::new(r), Box::new(w))
        } else {
            let (r, w) = tokio::io::split(tcp);
            (Box::new(r), Box::new(w))
        };

        Ok(NntpConnection {
            writer,
            reader: BufReader::with_capacity(64 * 1024, reader),
        })
    }

    async fn handshake(&self, conn: &mut NntpConnection) -> Result<(), NntpError> {
        let greeting = conn.read_response().await?;
        if !greeting.starts_with("200") && !greeting.starts_with("201") {
            return Err(NntpError::new(
                ErrorKind::Econnaborted,
                format!("unexpected greeting: {}", greeting),
            )
            .dropping());
        }

        let Some(user) = self.config.user.as_deref() else {
            return Ok(());
        };
        conn.send_command(&format!("AUTHINFO USER {}", user)).await?;
        let response = conn.read_response().await?;
        if response.starts_with("381") {
            conn.send_command(&format!(
                "AUTHINFO PASS {}",
                self.config.pass.as_deref().unwrap_or_default()
            ))
            .await?;
            let response = conn.read_response().await?;
            if !response.starts_with("281") {
                // Only the response code; the rest may echo credentials
                let code = response.split_whitespace().next().unwrap_or("unknown");
                return Err(NntpError::new(
                    ErrorKind::Econnaborted,
                    format!("authentication failed ({})", code),
                )
                .dropping());
            }
        } else if !response.starts_with("281") {
            let code = response.split_whitespace().next().unwrap_or("unknown");
            return Err(NntpError::new(
                ErrorKind::Econnaborted,
                format!("authentication failed ({})", code),
            )
            .dropping());
        }
        Ok(())
    }
}

#[async_trait]
impl NntpConnector for TcpNntpConnector {
    async fn connect(&self) -> Result<Box<dyn NntpClient>, NntpError> {
        let conn_timeout = self.config.conn_timeout();
        let session = timeout(conn_timeout, async {
            let mut conn = self.open_stream().await?;
            self.handshake(&mut conn).await?;
            Ok::<_, NntpError>(conn)
        })
        .await
        .map_err(|_| {
            NntpError::new(
                ErrorKind::Etimedout,
                format!(
                    "connect to {}:{} timed out after {:?}",
                    self.config.host, self.config.port, conn_timeout
                ),
            )
            .dropping()
        })??;
        Ok(Box::new(session))
    }
}
