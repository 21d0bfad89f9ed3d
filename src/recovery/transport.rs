//! Connection Provider
//!
//! The exchange serves exactly one request per connection, so the
//! coordinator asks a provider for a fresh stream every time.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Byte stream usable as a single-request connection
pub trait FeedStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> FeedStream for T {}

pub type Connection = Box<dyn FeedStream>;

#[async_trait::async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Open a new connection to the exchange
    async fn connect(&self) -> io::Result<Connection>;

    /// Human-readable target, for logs
    fn describe(&self) -> String;
}

/// Plain TCP connection to `host:port`
#[derive(Debug, Clone)]
pub struct TcpConnectionProvider {
    host: String,
    port: u16,
}

impl TcpConnectionProvider {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait::async_trait]
impl ConnectionProvider for TcpConnectionProvider {
    async fn connect(&self) -> io::Result<Connection> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {} from {:?}", self.describe(), stream.local_addr().ok());
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
