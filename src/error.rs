use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the HBase Thrift client and its connection pool.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("No connections available in pool (size {size}, waited {timeout:?}); retry later or increase the pool size")]
    NoConnectionsAvailable {
        size: usize,
        timeout: Option<Duration>,
    },
    #[error("Connection pool is closed")]
    PoolClosed,
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// `true` when the pool had nothing to hand out, as opposed to a failed request.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Error::NoConnectionsAvailable { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Connection(_))
    }
}
