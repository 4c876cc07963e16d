//! HTTP transport boundary and its monoio/rustls implementation
//!
//! The request pipeline only sees [`HttpTransport`]; tests swap in a fake.
//! [`MonoioHttpsClient`] speaks HTTP/1.1 over rustls on a monoio
//! `TcpStream`, one connection per request (`Connection: close`).

use crate::errors::{ExchangeError, Result};
use async_trait::async_trait;
use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::TcpStream;
use omniex_core::PerfTimer;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Methods whose parameters travel in the query string by default
    pub fn uses_query(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound request as handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Set a header, replacing any existing value (case-insensitive)
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Injectable HTTP boundary
///
/// Futures are `?Send`: monoio tasks stay on the thread that created them.
#[async_trait(?Send)]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub(crate) fn tls_config() -> Arc<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// Monoio-native HTTPS client
#[derive(Clone)]
pub struct MonoioHttpsClient {
    tls_config: Arc<ClientConfig>,
    user_agent: String,
}

impl MonoioHttpsClient {
    pub fn new() -> Self {
        Self {
            tls_config: tls_config(),
            user_agent: "omniex/0.1".to_string(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let parsed_url = url::Url::parse(&request.url)?;
        let host = parsed_url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl(format!("no host in {}", request.url)))?
            .to_string();
        let port = parsed_url.port_or_known_default().unwrap_or(443);
        let mut path_and_query = match parsed_url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = parsed_url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let tcp_stream = TcpStream::connect(format!("{host}:{port}"))
            .await
            .map_err(|e| ExchangeError::Network(format!("TCP connect to {host}:{port} failed: {e}")))?;
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| ExchangeError::InvalidUrl(format!("invalid server name {host}: {e}")))?;
        let tls_conn = ClientConnection::new(self.tls_config.clone(), server_name)
            .map_err(|e| ExchangeError::Network(format!("TLS setup failed: {e}")))?;
        let mut tls_stream = TlsStream::new(tcp_stream, tls_conn);

        let body = request.body.as_deref().unwrap_or("");
        let mut head = format!(
            "{} {path_and_query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             User-Agent: {}\r\n\
             Accept: application/json\r\n\
             Connection: close\r\n\
             Content-Length: {}\r\n",
            request.method,
            self.user_agent,
            body.len()
        );
        for (key, value) in &request.headers {
            head.push_str(&format!("{key}: {value}\r\n"));
        }
        head.push_str("\r\n");
        head.push_str(body);

        tls_stream.write_all(head.as_bytes()).await?;
        let raw = tls_stream.read_to_end().await?;
        parse_http_response(&raw)
    }
}

impl Default for MonoioHttpsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl HttpTransport for MonoioHttpsClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let _timer = PerfTimer::start(format!("http {} {}", request.method, request.url));
        let response = self.send(&request).await?;
        debug!("🌐 {} {} -> {}", request.method, request.url, response.status);
        Ok(response)
    }
}

/// Split a raw HTTP/1.1 response into status, headers and decoded body
pub(crate) fn parse_http_response(data: &[u8]) -> Result<HttpResponse> {
    let header_end = data
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ExchangeError::Network("invalid HTTP response: no header terminator".to_string()))?;

    let head = String::from_utf8_lossy(&data[..header_end]);
    let raw_body = &data[header_end + 4..];

    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ExchangeError::Network("invalid HTTP status line".to_string()))?;

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let chunked = headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked"));
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok());

    let body = if chunked {
        decode_chunked(raw_body)?
    } else if let Some(len) = content_length {
        raw_body[..len.min(raw_body.len())].to_vec()
    } else {
        raw_body.to_vec()
    };

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| ExchangeError::Network("truncated chunk header".to_string()))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ExchangeError::Network(format!("invalid chunk size {size_hex:?}")))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(ExchangeError::Network("truncated chunk body".to_string()));
        }
        out.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or(&[]);
    }
}

/// rustls session pumped over a monoio `TcpStream`
pub struct TlsStream {
    stream: TcpStream,
    tls_conn: ClientConnection,
    handshake_complete: bool,
}

impl TlsStream {
    pub fn new(stream: TcpStream, tls_conn: ClientConnection) -> Self {
        Self {
            stream,
            tls_conn,
            handshake_complete: false,
        }
    }

    pub async fn complete_handshake(&mut self) -> Result<()> {
        if self.handshake_complete {
            return Ok(());
        }

        loop {
            self.flush_tls().await?;

            if !self.tls_conn.is_handshaking() {
                self.handshake_complete = true;
                return Ok(());
            }

            if self.tls_conn.wants_read() {
                if self.fill_tls().await? == 0 {
                    return Err(ExchangeError::Network("connection closed during TLS handshake".to_string()));
                }
            } else if !self.tls_conn.wants_write() {
                return Err(ExchangeError::Network("TLS handshake stalled".to_string()));
            }
        }
    }

    /// Give back the socket and session, e.g. to split them after an upgrade
    pub(crate) fn into_parts(self) -> (TcpStream, ClientConnection) {
        (self.stream, self.tls_conn)
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.complete_handshake().await?;
        self.tls_conn
            .writer()
            .write_all(data)
            .map_err(|e| ExchangeError::Network(format!("TLS write failed: {e}")))?;
        self.flush_tls().await
    }

    /// Read decrypted bytes into `buf`; `Ok(0)` means the peer closed
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.complete_handshake().await?;
        loop {
            match self.tls_conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => return Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(ExchangeError::Network(format!("TLS read failed: {e}"))),
            }
            if self.fill_tls().await? == 0 {
                return Ok(0);
            }
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        let mut chunk = vec![0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(response);
            }
            response.extend_from_slice(&chunk[..n]);
        }
    }

    async fn flush_tls(&mut self) -> Result<()> {
        while self.tls_conn.wants_write() {
            let mut out = Vec::with_capacity(8192);
            self.tls_conn
                .write_tls(&mut out)
                .map_err(|e| ExchangeError::Network(format!("TLS write failed: {e}")))?;
            if !out.is_empty() {
                let (result, _) = self.stream.write_all(out).await;
                result.map_err(|e| ExchangeError::Network(format!("TCP write failed: {e}")))?;
            }
        }
        Ok(())
    }

    async fn fill_tls(&mut self) -> Result<usize> {
        let (result, buf) = self.stream.read(vec![0u8; 8192]).await;
        let bytes_read = result.map_err(|e| ExchangeError::Network(format!("TCP read failed: {e}")))?;
        if bytes_read == 0 {
            return Ok(0);
        }
        self.tls_conn
            .read_tls(&mut std::io::Cursor::new(&buf[..bytes_read]))
            .map_err(|e| ExchangeError::Network(format!("TLS read failed: {e}")))?;
        self.tls_conn
            .process_new_packets()
            .map_err(|e| ExchangeError::Network(format!("TLS process failed: {e}")))?;
        Ok(bytes_read)
    }
}
