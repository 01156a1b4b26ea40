//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use pkv_common::DEFAULT_PAYLOAD_DELIMITER;
use serde::{Deserialize, Serialize};

use crate::transport::Endpoint;

/// Configuration for one client connection and its engine thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoint, e.g. `Tcp("127.0.0.1:6379")`.
    pub endpoint: Endpoint,
    /// Optional connect timeout.
    pub connect_timeout: Option<Duration>,
    /// How long `stop` keeps servicing replies for commands already sent.
    pub shutdown_grace: Duration,
    /// Optional upper bound for blocking commands.
    pub blocking_timeout: Option<Duration>,
    /// Trailing byte that turns on the binary payload convention. `None`
    /// disables it.
    pub payload_delimiter: Option<u8>,
    /// Initial capacity of the read buffer.
    pub read_buffer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: Endpoint::Tcp("127.0.0.1:6379".to_string()),
            connect_timeout: Some(Duration::from_secs(5)),
            shutdown_grace: Duration::from_millis(100),
            blocking_timeout: None,
            payload_delimiter: Some(DEFAULT_PAYLOAD_DELIMITER),
            read_buffer_capacity: 16 * 1024,
        }
    }
}

impl ClientConfig {
    /// Default configuration for a TCP server at `addr`.
    pub fn tcp(addr: impl Into<String>) -> Self {
        ClientConfig {
            endpoint: Endpoint::Tcp(addr.into()),
            ..Self::default()
        }
    }

    /// Default configuration for a Unix-domain socket at `path`.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ClientConfig {
            endpoint: Endpoint::Unix(path.into()),
            ..Self::default()
        }
    }
}
