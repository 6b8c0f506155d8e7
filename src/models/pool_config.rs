use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::protocol::{Compat, Protocol};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9090;
pub const DEFAULT_POOL_SIZE: usize = 10;

/// 单个 Thrift 连接的参数，池中每个连接都使用同一份
/// Parameters shared by every connection a pool creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub timeout: Option<u64>, // socket 超时（毫秒）
    pub compat: Option<Compat>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: Protocol::default(),
            timeout: None,
            compat: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Socket timeout in milliseconds.
    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compat(mut self, compat: Compat) -> Self {
        self.compat = Some(compat);
        self
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.host.trim().is_empty() {
            return Err(Error::Configuration("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Configuration("port must be positive".into()));
        }
        if self.timeout == Some(0) {
            return Err(Error::Configuration("timeout must be positive".into()));
        }
        Ok(())
    }
}

/// 连接池配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub size: usize, // 池最大连接数
    #[serde(flatten)]
    pub connection: ConnectionOptions,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl PoolOptions {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            connection: ConnectionOptions::default(),
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.connection = self.connection.host(host);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.connection = self.connection.port(port);
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.connection = self.connection.protocol(protocol);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.connection = self.connection.timeout(timeout);
        self
    }

    pub fn compat(mut self, compat: Compat) -> Self {
        self.connection = self.connection.compat(compat);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.size == 0 {
            return Err(Error::Configuration("size must be positive".into()));
        }
        self.connection.validate()
    }
}
