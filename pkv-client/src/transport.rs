//! # Transport
//!
//! Opens the byte stream the engine talks RESP over. TCP and Unix-domain
//! sockets are supported; the engine only sees a boxed
//! `AsyncRead + AsyncWrite` stream.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ConnectionError;

/// Where the server lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// `host:port`.
    Tcp(String),
    /// Path of a Unix-domain socket.
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

pub(crate) trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub(crate) type BoxStream = Box<dyn Stream>;

/// Connects to `endpoint`, giving up after `timeout` if one is set.
pub(crate) async fn connect(
    endpoint: &Endpoint,
    timeout: Option<Duration>,
) -> Result<BoxStream, ConnectionError> {
    let attempt = open(endpoint);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no connection after {limit:?}"),
            )),
        },
        None => attempt.await,
    };
    result.map_err(|err| ConnectionError::Connect {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    })
}

async fn open(endpoint: &Endpoint) -> io::Result<BoxStream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not available on this platform",
        )),
    }
}
