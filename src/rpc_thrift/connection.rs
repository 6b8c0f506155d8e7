use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Error;
use crate::models::pool_config::ConnectionOptions;
use crate::models::protocol::{Compat, Protocol};
use crate::rpc::connection::Connection;
use crate::rpc_thrift::protocol::ThriftProtocol;

/// Buffered socket transport, the layer generated Thrift stubs write to.
pub struct BufferedTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl BufferedTransport {
    fn new(stream: TcpStream) -> io::Result<Self> {
        let read_half = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(stream),
        })
    }

    fn shutdown(mut self) -> io::Result<()> {
        let flushed = self.writer.flush();
        match self.writer.get_ref().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
            _ => {}
        }
        flushed
    }
}

impl Read for BufferedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for BufferedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Connection to an HBase Thrift gateway.
///
/// Construction only records the options; the socket is established by
/// [`open`](Connection::open) and released by [`close`](Connection::close)
/// or on drop. The configured [`Protocol`] decides how
/// [`with_protocol`](Self::with_protocol) encodes messages.
pub struct ThriftConnection {
    options: ConnectionOptions,
    open: AtomicBool,
    transport: Mutex<Option<ThriftProtocol<BufferedTransport>>>,
}

impl ThriftConnection {
    pub fn new(options: ConnectionOptions) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self {
            options,
            open: AtomicBool::new(false),
            transport: Mutex::new(None),
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.options.protocol
    }

    pub fn compat(&self) -> Option<Compat> {
        self.options.compat
    }

    pub fn address(&self) -> String {
        self.options.address()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Runs `f` against the protocol bound to the open transport.
    ///
    /// An I/O failure leaves the stream in an unknown state, so the transport
    /// is dropped and the connection reports itself closed afterwards.
    pub fn with_protocol<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut ThriftProtocol<BufferedTransport>) -> io::Result<R>,
    {
        let mut guard = self.transport.lock();
        let protocol = guard
            .as_mut()
            .ok_or_else(|| Error::Connection(format!("transport to {} is not open", self.address())))?;
        match f(protocol) {
            Ok(r) => Ok(r),
            Err(e) => {
                debug!(address = %self.address(), error = %e, "dropping broken Thrift transport");
                self.open.store(false, Ordering::SeqCst);
                if let Some(broken) = guard.take() {
                    if let Err(e) = broken.into_inner().shutdown() {
                        debug!(address = %self.address(), error = %e, "Thrift transport shutdown failed");
                    }
                }
                Err(Error::Transport(e))
            }
        }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let timeout = self.options.socket_timeout();
        let mut last_err = None;
        for addr in (self.options.host.as_str(), self.options.port).to_socket_addrs()? {
            let attempt = match timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(timeout)?;
                    stream.set_write_timeout(timeout)?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {}", self.address()),
            )
        }))
    }
}

impl Connection for ThriftConnection {
    fn from_options(options: &ConnectionOptions) -> Result<Self, Error> {
        Self::new(options.clone())
    }

    fn open(&self) -> Result<(), Error> {
        let mut guard = self.transport.lock();
        if guard.is_some() {
            return Ok(());
        }
        debug!(
            address = %self.address(),
            protocol = %self.options.protocol,
            "Opening Thrift transport"
        );
        let stream = self.connect()?;
        let transport = BufferedTransport::new(stream)?;
        *guard = Some(ThriftProtocol::new(self.options.protocol, transport));
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        let mut guard = self.transport.lock();
        let Some(protocol) = guard.take() else {
            return Ok(());
        };
        self.open.store(false, Ordering::SeqCst);
        drop(guard);
        debug!(address = %self.address(), "Closing Thrift transport");
        protocol.into_inner().shutdown()?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for ThriftConnection {
    fn drop(&mut self) {
        if let Some(protocol) = self.transport.get_mut().take() {
            if let Err(e) = protocol.into_inner().shutdown() {
                debug!(address = %self.options.address(), error = %e, "Thrift transport shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_thrift::protocol::MessageType;
    use std::net::TcpListener;
    use std::thread;

    fn echo_server() -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 64];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 || stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        });
        (port, handle)
    }

    #[test]
    fn test_new_does_not_connect() {
        let conn = ThriftConnection::new(ConnectionOptions::new("127.0.0.1", 1)).unwrap();
        assert!(!conn.is_open());
        assert_eq!(conn.address(), "127.0.0.1:1");
        assert_eq!(conn.protocol(), Protocol::Binary);
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let err = ThriftConnection::new(ConnectionOptions::new("h", 0)).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    fn open_echo(protocol: Protocol) -> (ThriftConnection, thread::JoinHandle<()>) {
        let (port, server) = echo_server();
        let conn = ThriftConnection::new(
            ConnectionOptions::new("127.0.0.1", port)
                .protocol(protocol)
                .timeout(2000),
        )
        .unwrap();
        conn.open().unwrap();
        (conn, server)
    }

    #[test]
    fn test_open_close_roundtrip() {
        let (conn, server) = open_echo(Protocol::Compact);
        conn.open().unwrap();
        assert!(conn.is_open());

        let (name, kind, seq) = conn
            .with_protocol(|p| {
                p.write_message_begin("getTableNames", MessageType::Call, 3)?;
                p.flush()?;
                p.read_message_begin()
            })
            .unwrap();
        assert_eq!((name.as_str(), kind, seq), ("getTableNames", MessageType::Call, 3));

        conn.close().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());
        server.join().unwrap();
    }

    #[test]
    fn test_protocol_setting_changes_wire_bytes() {
        let mut seen = Vec::new();
        for protocol in [Protocol::Binary, Protocol::Compact] {
            let (conn, server) = open_echo(protocol);
            let wire = conn
                .with_protocol(|p| {
                    assert_eq!(p.protocol(), protocol);
                    p.write_i32(300)?;
                    p.flush()?;
                    let len = if protocol == Protocol::Binary { 4 } else { 2 };
                    let mut buf = vec![0u8; len];
                    p.transport_mut().read_exact(&mut buf)?;
                    Ok(buf)
                })
                .unwrap();
            seen.push(wire);
            conn.close().unwrap();
            server.join().unwrap();
        }
        assert_eq!(seen[0], vec![0, 0, 1, 0x2c]);
        assert_eq!(seen[1], vec![0xd8, 0x04]);
    }

    #[test]
    fn test_is_open_inside_with_protocol() {
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = thread::spawn(move || {
            let (conn, _server) = open_echo(Protocol::Binary);
            let open = conn.with_protocol(|p| {
                p.write_i32(1)?;
                Ok(conn.is_open())
            });
            let _ = tx.send(open.map_err(|e| e.to_string()));
        });
        let open = rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("with_protocol blocked on is_open");
        assert_eq!(open, Ok(true));
        worker.join().unwrap();
    }

    #[test]
    fn test_transport_requires_open() {
        let conn = ThriftConnection::new(ConnectionOptions::new("127.0.0.1", 9)).unwrap();
        let err = conn.with_protocol(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_io_failure_marks_connection_closed() {
        let (conn, _server) = open_echo(Protocol::Binary);

        let err = conn
            .with_protocol(|_| -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
            })
            .unwrap_err();
        assert!(err.is_transport());
        assert!(!conn.is_open());
    }

    #[test]
    fn test_open_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let conn =
            ThriftConnection::new(ConnectionOptions::new("127.0.0.1", port).timeout(500)).unwrap();
        let err = conn.open().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(!conn.is_open());
    }
}
