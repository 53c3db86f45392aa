//! Opens a TCP tunnel to the game server through an HTTP forward proxy
//! using the `CONNECT` method.
//!
//! The proxy's response head is read incrementally up to the blank line.
//! Anything the proxy sent after it already belongs to the game server and
//! is handed back as the start of the returned [`TunnelStream`].

use crate::resolver::ServerAddress;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::{
    fmt, io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
};

/// Upper bound on the proxy's status line plus headers.
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("invalid tunnel request: {0}")]
    InvalidRequest(&'static str),
    #[error("failed to connect to proxy {proxy}: {source}")]
    Connect {
        proxy: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send CONNECT request: {0}")]
    Write(#[source] io::Error),
    #[error("failed to read proxy response: {0}")]
    Read(#[source] io::Error),
    #[error("proxy closed the connection before finishing its response")]
    UnexpectedEof,
    #[error("proxy response head exceeds {MAX_RESPONSE_HEAD} bytes")]
    ResponseTooLarge,
    #[error("malformed proxy response: {0}")]
    MalformedResponse(String),
    #[error("proxy refused tunnel: {status_line}")]
    Rejected { status: u16, status_line: String },
}

/// `user:password` for Basic proxy authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredential(String);

impl ProxyCredential {
    /// Returns `None` when the credential is blank.
    pub fn new(credential: &str) -> Option<Self> {
        let credential = credential.trim();
        (!credential.is_empty()).then(|| Self(credential.to_owned()))
    }

    /// Value of the `Proxy-Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Basic {}", STANDARD.encode(&self.0))
    }
}

impl fmt::Debug for ProxyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProxyCredential(..)")
    }
}

/// Where to tunnel to, and through which proxy.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    proxy: String,
    target: ServerAddress,
    credential: Option<ProxyCredential>,
}

impl TunnelRequest {
    pub fn new(
        proxy: impl Into<String>,
        target: ServerAddress,
        credential: Option<ProxyCredential>,
    ) -> Result<Self, TunnelError> {
        let proxy = proxy.into().trim().to_owned();
        if proxy.is_empty() {
            return Err(TunnelError::InvalidRequest("proxy address is empty"));
        }
        if target.host.is_empty() {
            return Err(TunnelError::InvalidRequest("target host is empty"));
        }
        Ok(Self {
            proxy,
            target,
            credential,
        })
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    pub fn target(&self) -> &ServerAddress {
        &self.target
    }

    /// The full `CONNECT` request including the terminating blank line.
    pub fn connect_request(&self) -> String {
        let target = &self.target;
        let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some(credential) = &self.credential {
            request.push_str("Proxy-Authorization: ");
            request.push_str(&credential.authorization());
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        request
    }
}

/// Connects to the proxy and opens a tunnel through it.
pub async fn establish_tunnel(
    request: &TunnelRequest,
) -> Result<TunnelStream<TcpStream>, TunnelError> {
    let stream = connect_proxy(request).await?;
    open_tunnel(stream, request).await
}

pub async fn connect_proxy(request: &TunnelRequest) -> Result<TcpStream, TunnelError> {
    let stream = TcpStream::connect(request.proxy())
        .await
        .map_err(|source| TunnelError::Connect {
            proxy: request.proxy().to_owned(),
            source,
        })?;
    stream.set_nodelay(true).map_err(TunnelError::Write)?;
    tracing::debug!("Connected to proxy {}", request.proxy());
    Ok(stream)
}

/// Performs the `CONNECT` exchange on an already-connected proxy stream.
///
/// On failure `stream` is dropped before the error is returned.
pub async fn open_tunnel<S>(
    mut stream: S,
    request: &TunnelRequest,
) -> Result<TunnelStream<S>, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(request.connect_request().as_bytes())
        .await
        .map_err(TunnelError::Write)?;
    stream.flush().await.map_err(TunnelError::Write)?;

    let (head, leftover) = read_response_head(&mut stream).await?;
    let response = ResponseHead::parse(&head)?;
    if !(200..300).contains(&response.status) {
        tracing::debug!("Proxy rejected tunnel: {}", response.status_line);
        return Err(TunnelError::Rejected {
            status: response.status,
            status_line: response.status_line,
        });
    }

    tracing::debug!(
        "Tunnel to {} open ({}), {} bytes pipelined",
        request.target(),
        response.status_line,
        leftover.len()
    );
    Ok(TunnelStream::new(stream, leftover))
}

/// Reads until the blank line ending the response head. Returns the head
/// (without the terminator) and whatever followed it.
async fn read_response_head<S>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>), TunnelError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];
    let mut scanned: usize = 0;
    loop {
        let n = stream.read(&mut chunk).await.map_err(TunnelError::Read)?;
        if n == 0 {
            return Err(TunnelError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);

        // the terminator may straddle two reads
        let from = scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
        if let Some(pos) = find(&buf[from..], HEAD_TERMINATOR) {
            let end = from + pos;
            if end > MAX_RESPONSE_HEAD {
                return Err(TunnelError::ResponseTooLarge);
            }
            let leftover = buf.split_off(end + HEAD_TERMINATOR.len());
            buf.truncate(end);
            return Ok((buf, leftover));
        }
        if buf.len() > MAX_RESPONSE_HEAD + HEAD_TERMINATOR.len() {
            return Err(TunnelError::ResponseTooLarge);
        }
        scanned = buf.len();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parsed status line and headers of a proxy response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub status_line: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Parses a head with the final blank line already stripped.
    pub fn parse(head: &[u8]) -> Result<Self, TunnelError> {
        let head = std::str::from_utf8(head).map_err(|_| {
            TunnelError::MalformedResponse(String::from_utf8_lossy(head).into_owned())
        })?;
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let malformed = || TunnelError::MalformedResponse(status_line.to_owned());

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") || version.len() <= "HTTP/".len() {
            return Err(malformed());
        }
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let status = code.parse().map_err(|_| malformed())?;

        let mut headers = Vec::new();
        for line in lines {
            let bad_header =
                || TunnelError::MalformedResponse(format!("{status_line} (bad header {line:?})"));
            let (name, value) = line.split_once(':').ok_or_else(bad_header)?;
            let name = name.trim();
            if name.is_empty() {
                return Err(bad_header());
            }
            headers.push((name.to_owned(), value.trim().to_owned()));
        }

        Ok(Self {
            status,
            status_line: status_line.to_owned(),
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The tunnelled byte stream. Yields bytes the proxy pipelined after its
/// response head before reading from the socket again.
#[pin_project::pin_project]
pub struct TunnelStream<S> {
    #[pin]
    inner: S,
    leftover: Vec<u8>,
    leftover_pos: usize,
}

impl<S> TunnelStream<S> {
    pub fn new(inner: S, leftover: Vec<u8>) -> Self {
        Self {
            inner,
            leftover,
            leftover_pos: 0,
        }
    }

    /// Pipelined bytes not yet read.
    pub fn pending(&self) -> &[u8] {
        &self.leftover[self.leftover_pos..]
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Unread pipelined bytes are lost.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: fmt::Debug> fmt::Debug for TunnelStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelStream")
            .field("inner", &self.inner)
            .field("pending", &self.pending().len())
            .finish()
    }
}

impl<S> AsyncRead for TunnelStream<S>
where
    S: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.leftover_pos < this.leftover.len() {
            let pending = &this.leftover[*this.leftover_pos..];
            let n = pending.len().min(buf.remaining());
            buf.put_slice(&pending[..n]);
            *this.leftover_pos += n;
            if *this.leftover_pos == this.leftover.len() {
                *this.leftover = Vec::new();
                *this.leftover_pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        AsyncRead::poll_read(this.inner, cx, buf)
    }
}

impl<S> AsyncWrite for TunnelStream<S>
where
    S: AsyncWrite,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(self.project().inner, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(self.project().inner, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(self.project().inner, cx)
    }
}
