//! WebSocket boundary and its monoio implementation
//!
//! The connection manager talks to sockets only through [`WsConnector`],
//! which opens a [`WsSession`] split into a [`WsReader`] and a [`WsWriter`].
//! The reader lives on its own task for the whole session, so an in-flight
//! read is never cancelled to make room for a send.
//!
//! [`MonoioConnector`] is a minimal RFC 6455 client over rustls on monoio:
//! text frames, continuation reassembly, size limits and close handshake.

use crate::errors::{ExchangeError, Result};
use crate::http::{tls_config, TlsStream};
use async_trait::async_trait;
use base64::Engine;
use monoio::io::{AsyncReadRent, AsyncWriteRentExt, OwnedReadHalf, OwnedWriteHalf, Splitable};
use monoio::net::TcpStream;
use omniex_core::{nanos, PerfTimer};
use rustls::ClientConnection;
use sha1::{Digest, Sha1};
use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::rc::Rc;
use tracing::{debug, info};
use url::Url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest frame payload or reassembled message accepted from a peer
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// One inbound application-level message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    /// The peer expects this payload echoed back in a pong
    Ping(Vec<u8>),
}

/// Inbound half of a session
#[async_trait(?Send)]
pub trait WsReader {
    /// Next message. `Ok(None)` means the peer closed the session.
    async fn next_message(&mut self) -> Result<Option<WsMessage>>;
}

/// Outbound half of a session
#[async_trait(?Send)]
pub trait WsWriter {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn ping(&mut self) -> Result<()>;

    async fn pong(&mut self, payload: Vec<u8>) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// One live socket session
pub struct WsSession {
    pub reader: Box<dyn WsReader>,
    pub writer: Box<dyn WsWriter>,
}

/// Opens sessions for an endpoint URL
#[async_trait(?Send)]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<WsSession>;
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            payload,
        }
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload)
    }

    /// Encode as a client frame; clients must always mask
    pub fn encode(&self, mask: [u8; 4]) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);
        out.push(if self.fin { 0x80 } else { 0x00 } | self.opcode as u8);

        if len < 126 {
            out.push(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        out.extend_from_slice(&mask);
        out.extend(self.payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        out
    }

    /// Decode one frame from the front of `data`.
    ///
    /// `Ok(None)` means more bytes are needed; the second tuple field is the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }

        let fin = data[0] & 0x80 != 0;
        let opcode = OpCode::from_u8(data[0] & 0x0f)
            .ok_or_else(|| ExchangeError::Network(format!("invalid WebSocket opcode {:#x}", data[0] & 0x0f)))?;
        let masked = data[1] & 0x80 != 0;

        let mut offset = 2;
        let payload_len = match data[1] & 0x7f {
            126 => {
                let Some(bytes) = data.get(2..4) else { return Ok(None) };
                offset += 2;
                u16::from_be_bytes([bytes[0], bytes[1]]) as usize
            }
            127 => {
                let Some(bytes) = data.get(2..10) else { return Ok(None) };
                offset += 8;
                let mut len = [0u8; 8];
                len.copy_from_slice(bytes);
                let len = u64::from_be_bytes(len);
                usize::try_from(len)
                    .map_err(|_| ExchangeError::Network(format!("WebSocket frame length {len} does not fit in memory")))?
            }
            n => n as usize,
        };
        if payload_len > MAX_MESSAGE_SIZE {
            return Err(ExchangeError::Network(format!(
                "WebSocket frame of {payload_len} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit"
            )));
        }

        let mask = if masked {
            let Some(bytes) = data.get(offset..offset + 4) else { return Ok(None) };
            offset += 4;
            Some([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            None
        };

        let end = offset
            .checked_add(payload_len)
            .ok_or_else(|| ExchangeError::Network("WebSocket frame length overflows".to_string()))?;
        let Some(body) = data.get(offset..end) else { return Ok(None) };
        let payload = match mask {
            Some(mask) => body.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect(),
            None => body.to_vec(),
        };

        Ok(Some((Frame { fin, opcode, payload }, end)))
    }
}

/// Cheap per-frame mask source; masking only defeats proxy cache poisoning,
/// it is not a secrecy mechanism.
fn next_mask(state: &mut u64) -> [u8; 4] {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    (*state as u32).to_be_bytes()
}

pub fn accept_key(ws_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ws_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Client side of an upgraded `wss://` socket before it is split
struct Handshake {
    stream: TlsStream,
    buffer: Vec<u8>,
    mask_state: u64,
}

impl Handshake {
    async fn connect(url: &Url) -> Result<Self> {
        let _timer = PerfTimer::start(format!("websocket connect {url}"));

        if url.scheme() != "wss" {
            return Err(ExchangeError::InvalidUrl(format!("unsupported WebSocket scheme in {url}")));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl(format!("no host in {url}")))?
            .to_string();
        let port = url.port().unwrap_or(443);

        let tcp_stream = TcpStream::connect(format!("{host}:{port}"))
            .await
            .map_err(|e| ExchangeError::Network(format!("TCP connect to {host}:{port} failed: {e}")))?;
        let server_name = rustls::pki_types::ServerName::try_from(host.clone())
            .map_err(|e| ExchangeError::InvalidUrl(format!("invalid server name {host}: {e}")))?;
        let tls_conn = rustls::ClientConnection::new(tls_config(), server_name)
            .map_err(|e| ExchangeError::Network(format!("TLS setup failed: {e}")))?;
        let mut stream = TlsStream::new(tcp_stream, tls_conn);
        stream.complete_handshake().await?;

        let mut handshake = Self {
            stream,
            buffer: Vec::with_capacity(8192),
            mask_state: nanos() | 1,
        };
        handshake.upgrade(url, &host).await?;

        info!("✅ WebSocket connected to {}", url);
        Ok(handshake)
    }

    async fn upgrade(&mut self, url: &Url, host: &str) -> Result<()> {
        let mut key_bytes = [0u8; 16];
        key_bytes[..4].copy_from_slice(&next_mask(&mut self.mask_state));
        key_bytes[4..8].copy_from_slice(&next_mask(&mut self.mask_state));
        key_bytes[8..].copy_from_slice(&nanos().to_be_bytes());
        let ws_key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

        let path = match url.path() {
            "" => "/",
            path => path,
        };
        let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
        let request = format!(
            "GET {path}{query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {ws_key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        self.stream.write_all(request.as_bytes()).await?;

        let mut chunk = vec![0u8; 4096];
        let header_end = loop {
            if let Some(pos) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ExchangeError::Network("connection closed during WebSocket upgrade".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&self.buffer[..header_end]).to_string();
        // Bytes after the header already belong to the first frames
        self.buffer.drain(..header_end + 4);

        if !head.starts_with("HTTP/1.1 101") {
            let status = head.lines().next().unwrap_or_default();
            return Err(ExchangeError::Network(format!("WebSocket upgrade rejected: {status}")));
        }
        let expected = accept_key(&ws_key);
        let accepted = head.lines().any(|line| {
            line.split_once(':')
                .map(|(k, v)| k.trim().eq_ignore_ascii_case("sec-websocket-accept") && v.trim() == expected)
                .unwrap_or(false)
        });
        if !accepted {
            return Err(ExchangeError::Network("WebSocket upgrade returned a bad accept key".to_string()));
        }

        debug!("WebSocket upgrade complete");
        Ok(())
    }

    /// Split into halves sharing the TLS session
    fn split(self) -> WsSession {
        let (tcp, tls_conn) = self.stream.into_parts();
        let (read_half, write_half) = tcp.into_split();
        let tls = Rc::new(RefCell::new(tls_conn));
        let open = Rc::new(Cell::new(true));

        WsSession {
            reader: Box::new(MonoioWsReader {
                tcp: read_half,
                tls: Rc::clone(&tls),
                buffer: self.buffer,
                fragments: Vec::new(),
                open: Rc::clone(&open),
            }),
            writer: Box::new(MonoioWsWriter {
                tcp: write_half,
                tls,
                mask_state: self.mask_state,
                open,
            }),
        }
    }
}

/// Read half of a monoio WebSocket
///
/// Never borrows the TLS session across an await, so the writer can run
/// while a read is pending.
pub struct MonoioWsReader {
    tcp: OwnedReadHalf<TcpStream>,
    tls: Rc<RefCell<ClientConnection>>,
    buffer: Vec<u8>,
    fragments: Vec<u8>,
    open: Rc<Cell<bool>>,
}

impl MonoioWsReader {
    /// Move decrypted bytes into the frame buffer; false once the peer is gone
    async fn fill(&mut self) -> Result<bool> {
        let mut plain = [0u8; 8192];
        loop {
            {
                let mut tls = self.tls.borrow_mut();
                match tls.reader().read(&mut plain) {
                    Ok(0) => return Ok(false),
                    Ok(n) => {
                        self.buffer.extend_from_slice(&plain[..n]);
                        return Ok(true);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
                    Err(e) => return Err(ExchangeError::Network(format!("TLS read failed: {e}"))),
                }
            }

            let (result, buf) = self.tcp.read(vec![0u8; 8192]).await;
            let n = result.map_err(|e| ExchangeError::Network(format!("TCP read failed: {e}")))?;
            if n == 0 {
                return Ok(false);
            }
            let mut tls = self.tls.borrow_mut();
            tls.read_tls(&mut std::io::Cursor::new(&buf[..n]))
                .map_err(|e| ExchangeError::Network(format!("TLS read failed: {e}")))?;
            tls.process_new_packets()
                .map_err(|e| ExchangeError::Network(format!("TLS process failed: {e}")))?;
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some((frame, consumed)) = Frame::decode(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(Some(frame));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }
}

#[async_trait(?Send)]
impl WsReader for MonoioWsReader {
    async fn next_message(&mut self) -> Result<Option<WsMessage>> {
        loop {
            let Some(frame) = self.next_frame().await? else {
                self.open.set(false);
                return Ok(None);
            };

            match frame.opcode {
                OpCode::Ping => return Ok(Some(WsMessage::Ping(frame.payload))),
                OpCode::Pong => {}
                OpCode::Close => return Ok(None),
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    if self.fragments.len() + frame.payload.len() > MAX_MESSAGE_SIZE {
                        self.fragments.clear();
                        return Err(ExchangeError::Network(format!(
                            "fragmented WebSocket message exceeds the {MAX_MESSAGE_SIZE} byte limit"
                        )));
                    }
                    self.fragments.extend_from_slice(&frame.payload);
                    if frame.fin {
                        let message = std::mem::take(&mut self.fragments);
                        return Ok(Some(WsMessage::Text(String::from_utf8_lossy(&message).into_owned())));
                    }
                }
            }
        }
    }
}

/// Write half of a monoio WebSocket
pub struct MonoioWsWriter {
    tcp: OwnedWriteHalf<TcpStream>,
    tls: Rc<RefCell<ClientConnection>>,
    mask_state: u64,
    open: Rc<Cell<bool>>,
}

impl MonoioWsWriter {
    async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.open.get() {
            return Err(ExchangeError::Network("WebSocket not connected".to_string()));
        }
        let encoded = frame.encode(next_mask(&mut self.mask_state));
        let out = {
            let mut tls = self.tls.borrow_mut();
            tls.writer()
                .write_all(&encoded)
                .map_err(|e| ExchangeError::Network(format!("TLS write failed: {e}")))?;
            let mut out = Vec::with_capacity(encoded.len() + 64);
            while tls.wants_write() {
                tls.write_tls(&mut out)
                    .map_err(|e| ExchangeError::Network(format!("TLS write failed: {e}")))?;
            }
            out
        };

        let (result, _) = self.tcp.write_all(out).await;
        result.map_err(|e| ExchangeError::Network(format!("TCP write failed: {e}")))?;
        if frame.opcode == OpCode::Close {
            self.open.set(false);
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl WsWriter for MonoioWsWriter {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send_frame(Frame::new(OpCode::Text, text.into_bytes())).await
    }

    async fn ping(&mut self) -> Result<()> {
        self.send_frame(Frame::new(OpCode::Ping, Vec::new())).await
    }

    async fn pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.send_frame(Frame::new(OpCode::Pong, payload)).await
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open.get() {
            return Ok(());
        }
        info!("🔌 Closing WebSocket connection");
        self.send_frame(Frame::close(1000, "Normal closure")).await
    }
}

/// Connects real `wss://` endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct MonoioConnector;

#[async_trait(?Send)]
impl WsConnector for MonoioConnector {
    async fn connect(&self, url: &str) -> Result<WsSession> {
        let url = Url::parse(url)?;
        Ok(Handshake::connect(&url).await?.split())
    }
}
