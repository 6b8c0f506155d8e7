use std::time::Duration;

use hbase_thrift::pool_manager::{pool_mgr, POOLS};
use hbase_thrift::{Connection, PoolOptions, Protocol, DEFAULT_HOST, DEFAULT_PORT};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let host = std::env::var("HBASE_THRIFT_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port = match std::env::var("HBASE_THRIFT_PORT") {
        Ok(p) => p.parse()?,
        Err(_) => DEFAULT_PORT,
    };
    let protocol: Protocol = std::env::var("HBASE_THRIFT_PROTOCOL")
        .unwrap_or_else(|_| "binary".to_string())
        .parse()?;

    let options = PoolOptions::new(3)
        .host(host)
        .port(port)
        .protocol(protocol)
        .timeout(5_000);
    pool_mgr().register("main", options)?;

    let mut tasks = Vec::new();
    for worker in 0..10 {
        let pool = POOLS.pool("main").expect("registered above");
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                let result = pool
                    .run(Some(Duration::from_secs(2)), |conn| {
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(conn.is_open())
                    })
                    .await;
                match result {
                    Ok(open) => info!(worker, open, "checked out connection"),
                    Err(e) if e.is_pool_exhausted() => warn!(worker, "pool busy, retrying"),
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    if let Some(pool) = pool_mgr().remove("main") {
        info!(status = ?pool.status(), "pool closed");
    }
    Ok(())
}
