//! RESP2 shard client
//!
//! Just enough of the Redis protocol for session routing: GET, SET with an
//! optional PX expiry, and INFO. One connection per shard, serialised by an
//! async mutex and re-established on the next call after an I/O failure.

use crate::error::SessiaError;
use crate::shard::client::{ShardClient, ShardConnector};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Largest bulk string accepted from a shard
const MAX_BULK_LEN: usize = 64 * 1024 * 1024;

/// Largest array accepted from a shard
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// RESP reply frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// +OK\r\n
    Simple(String),
    /// -ERR message\r\n
    Error(String),
    /// :123\r\n
    Integer(i64),
    /// $5\r\nhello\r\n
    Bulk(Bytes),
    /// $-1\r\n or *-1\r\n
    Null,
    /// *2\r\n...
    Array(Vec<Frame>),
}

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Read one reply frame
pub fn read_frame<'a, R>(reader: &'a mut R) -> Pin<Box<dyn Future<Output = io::Result<Frame>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let (kind, rest) = line
            .split_first()
            .ok_or_else(|| invalid("empty reply line"))?;
        let rest = std::str::from_utf8(rest).map_err(|_| invalid("reply header is not utf-8"))?;

        match kind {
            b'+' => Ok(Frame::Simple(rest.to_string())),
            b'-' => Ok(Frame::Error(rest.to_string())),
            b':' => rest
                .parse()
                .map(Frame::Integer)
                .map_err(|_| invalid(format!("invalid integer: {rest}"))),
            b'$' => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| invalid(format!("invalid bulk length: {rest}")))?;
                if len < 0 {
                    return Ok(Frame::Null);
                }
                let len = len as usize;
                if len > MAX_BULK_LEN {
                    return Err(invalid(format!("bulk string too large: {len}")));
                }
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data).await?;
                if &data[len..] != b"\r\n" {
                    return Err(invalid("expected CRLF after bulk string"));
                }
                data.truncate(len);
                Ok(Frame::Bulk(Bytes::from(data)))
            }
            b'*' => {
                let count: i64 = rest
                    .parse()
                    .map_err(|_| invalid(format!("invalid array length: {rest}")))?;
                if count < 0 {
                    return Ok(Frame::Null);
                }
                let count = count as usize;
                if count > MAX_ARRAY_LEN {
                    return Err(invalid(format!("array too large: {count}")));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(read_frame(reader).await?);
                }
                Ok(Frame::Array(items))
            }
            other => Err(invalid(format!("unknown reply type byte: {other}"))),
        }
    })
}

async fn read_line<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "shard closed connection"));
    }
    if !line.ends_with(b"\r\n") {
        return Err(invalid("reply line not terminated by CRLF"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// A single request/reply connection over any byte stream
pub struct Connection<S> {
    stream: BufReader<S>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Send a command and wait for its reply
    pub async fn request(&mut self, args: &[&[u8]]) -> io::Result<Frame> {
        let encoded = encode_command(args);
        self.stream.get_mut().write_all(&encoded).await?;
        self.stream.get_mut().flush().await?;
        read_frame(&mut self.stream).await
    }
}

/// Shard client speaking RESP over TCP
pub struct RespShardClient {
    address: String,
    timeout: Duration,
    conn: Mutex<Option<Connection<TcpStream>>>,
}

impl RespShardClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    fn unavailable(&self, source: io::Error) -> SessiaError {
        SessiaError::ShardUnavailable {
            address: self.address.clone(),
            source: Box::new(source),
        }
    }

    fn protocol(&self, message: impl Into<String>) -> SessiaError {
        SessiaError::ShardProtocol {
            address: self.address.clone(),
            message: message.into(),
        }
    }

    async fn call(&self, args: &[&[u8]]) -> Result<Frame, SessiaError> {
        let mut guard = self.conn.lock().await;

        let result = tokio::time::timeout(self.timeout, async {
            if guard.is_none() {
                debug!(address = %self.address, "Connecting to shard");
                let stream = TcpStream::connect(&self.address).await?;
                stream.set_nodelay(true)?;
                *guard = Some(Connection::new(stream));
            }
            match guard.as_mut() {
                Some(conn) => conn.request(args).await,
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "no connection")),
            }
        })
        .await;

        let frame = match result {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                *guard = None;
                warn!(address = %self.address, error = %e, "Shard request failed, dropping connection");
                return Err(self.unavailable(e));
            }
            Err(_) => {
                // A late reply would desynchronise the stream
                *guard = None;
                return Err(self.unavailable(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "shard request timed out",
                )));
            }
        };

        match frame {
            Frame::Error(message) => Err(self.protocol(message)),
            frame => Ok(frame),
        }
    }
}

#[async_trait]
impl ShardClient for RespShardClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, SessiaError> {
        match self.call(&[b"GET", key.as_bytes()]).await? {
            Frame::Bulk(data) => Ok(Some(data)),
            Frame::Null => Ok(None),
            other => Err(self.protocol(format!("unexpected GET reply: {other:?}"))),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), SessiaError> {
        let reply = match ttl {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1).to_string();
                self.call(&[b"SET", key.as_bytes(), &value[..], b"PX", millis.as_bytes()])
                    .await?
            }
            None => self.call(&[b"SET", key.as_bytes(), &value[..]]).await?,
        };
        match reply {
            Frame::Simple(status) if status == "OK" => Ok(()),
            other => Err(self.protocol(format!("unexpected SET reply: {other:?}"))),
        }
    }

    async fn info(&self, section: &str) -> Result<String, SessiaError> {
        match self.call(&[b"INFO", section.as_bytes()]).await? {
            Frame::Bulk(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            other => Err(self.protocol(format!("unexpected INFO reply: {other:?}"))),
        }
    }

    async fn close(&self) {
        if self.conn.lock().await.take().is_some() {
            debug!(address = %self.address, "Closed shard connection");
        }
    }
}

/// Builds [`RespShardClient`] handles
#[derive(Debug, Clone)]
pub struct RespConnector {
    timeout: Duration,
}

impl RespConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ShardConnector for RespConnector {
    fn connect(&self, address: &str) -> Arc<dyn ShardClient> {
        Arc::new(RespShardClient::new(address, self.timeout))
    }
}
