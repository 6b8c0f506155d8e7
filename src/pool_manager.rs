use std::sync::LazyLock;

use dashmap::DashMap;
use tracing::debug;

use crate::error::Error;
use crate::models::pool_config::PoolOptions;
use crate::pool::ConnectionPool;
use crate::rpc::connection::Connection;
use crate::rpc_thrift::connection::ThriftConnection;

// 全局单例
pub static POOLS: LazyLock<PoolManager> = LazyLock::new(PoolManager::new);

/// 获取全局 PoolManager 实例
pub fn pool_mgr() -> &'static PoolManager {
    &POOLS
}

/// 连接池管理器，按名称注册多个 Thrift 网关的连接池
/// Registry of named connection pools
pub struct PoolManager<C: Connection = ThriftConnection> {
    pools: DashMap<String, ConnectionPool<C>>,
}

impl<C: Connection> Default for PoolManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> PoolManager<C> {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// 注册连接池；同名的旧连接池会被关闭
    pub fn register(&self, name: &str, options: PoolOptions) -> Result<ConnectionPool<C>, Error> {
        let pool = ConnectionPool::from_options(options)?;
        if let Some(previous) = self.pools.insert(name.to_string(), pool.clone()) {
            debug!(name, "Replacing registered connection pool");
            previous.close_all();
        }
        Ok(pool)
    }

    pub fn pool(&self, name: &str) -> Option<ConnectionPool<C>> {
        self.pools.get(name).map(|v| v.value().clone())
    }

    /// 移除并关闭连接池
    pub fn remove(&self, name: &str) -> Option<ConnectionPool<C>> {
        let (_, pool) = self.pools.remove(name)?;
        pool.close_all();
        Some(pool)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn close_all(&self) {
        for entry in self.pools.iter() {
            entry.value().close_all();
        }
    }
}
