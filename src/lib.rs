pub mod error;
pub mod models;
pub mod pool;
pub mod pool_manager;
pub mod rpc;
pub mod rpc_thrift;

pub use error::{Error, Result};
pub use models::pool_config::{ConnectionOptions, PoolOptions, DEFAULT_HOST, DEFAULT_PORT};
pub use models::protocol::{Compat, Protocol};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use rpc::connection::Connection;
pub use rpc_thrift::connection::ThriftConnection;
