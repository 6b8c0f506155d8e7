use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use hbase_thrift::rpc_thrift::protocol::MessageType;
use hbase_thrift::{Connection, ConnectionOptions, ConnectionPool, Protocol, ThriftConnection};

/// Echo gateway that counts accepted sockets.
fn gateway() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            thread::spawn(move || {
                let mut buf = [0u8; 256];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 || stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            });
        }
    });
    (port, accepts)
}

fn wait_for(accepts: &AtomicUsize, expected: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(2);
    while accepts.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    accepts.load(Ordering::SeqCst)
}

#[test]
fn test_broken_transport_is_reopened_on_next_checkout() {
    let (port, accepts) = gateway();
    let options = ConnectionOptions::new("127.0.0.1", port)
        .protocol(Protocol::Compact)
        .timeout(2000);
    let pool: ConnectionPool<ThriftConnection> = ConnectionPool::new(1, options).unwrap();

    {
        let conn = pool.connection().unwrap();
        assert!(conn.is_open());
        let err = conn
            .with_protocol(|_| -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "gateway restarted"))
            })
            .unwrap_err();
        assert!(err.is_transport());
        assert!(!conn.is_open());
    }
    assert_eq!(wait_for(&accepts, 1), 1);
    assert_eq!(pool.status().idle, 1);

    let conn = pool.connection().unwrap();
    assert!(conn.is_open());
    let (name, kind, seq) = conn
        .with_protocol(|p| {
            p.write_message_begin("getTableNames", MessageType::Call, 7)?;
            p.flush()?;
            p.read_message_begin()
        })
        .unwrap();
    assert_eq!((name.as_str(), kind, seq), ("getTableNames", MessageType::Call, 7));

    assert_eq!(wait_for(&accepts, 2), 2);
    assert_eq!(pool.status().created, 1);
}
