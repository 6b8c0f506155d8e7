use crate::error::Error;
use crate::models::pool_config::ConnectionOptions;

/// 可被连接池管理的 RPC 连接
///
/// The pool only ever touches these four operations; RPC methods are the
/// business of whoever holds the connection. Methods take `&self` so a
/// thread re-entering the pool can share the very same connection object.
pub trait Connection: Send + Sync + 'static {
    /// Builds the connection from options without performing any I/O.
    fn from_options(options: &ConnectionOptions) -> Result<Self, Error>
    where
        Self: Sized;

    /// Opens the transport. No-op when already open.
    fn open(&self) -> Result<(), Error>;

    /// Closes the transport. No-op when already closed.
    fn close(&self) -> Result<(), Error>;

    fn is_open(&self) -> bool;
}
