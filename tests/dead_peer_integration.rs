//! Dead-peer hardening over real loopback connections
//!
//! These tests set up TLS over TCP on 127.0.0.1, harden the client side and
//! check that socket options land on the connection's own socket, and that
//! a peer vanishing is reported by the read path promptly.

use deadpeer::conn::tls::{TlsConfig, TlsConnection, TlsVersion};
use deadpeer::conn::{self, read_timeout, Connection, PlainConnection, PollEvents};
use deadpeer::tcp::{self, extract_transport, harden, TimeoutSnapshot, KEEPALIVE_PERIOD};
use socket2::SockRef;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Connected TLS pair; the server side is returned from its thread
fn tls_pair() -> (TlsConnection<TcpStream>, thread::JoinHandle<TlsConnection<TcpStream>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_config = TlsConfig::server()
        .version(TlsVersion::Tls13)
        .build()
        .unwrap();

    let server = thread::spawn(move || {
        let (tcp_stream, _) = listener.accept().unwrap();
        server_config.accept(tcp_stream).unwrap()
    });

    let client_config = TlsConfig::client()
        .version(TlsVersion::Tls13)
        .build()
        .unwrap();
    let client = client_config
        .connect(TcpStream::connect(addr).unwrap())
        .unwrap();

    (client, server)
}

#[test]
fn test_harden_boxed_tls_connection() {
    init_logging();
    let (client, server) = tls_pair();
    let conn: Box<dyn Connection> = Box::new(client);

    harden(conn.as_ref()).unwrap();

    let stream = extract_transport(conn.as_ref()).unwrap();
    let snapshot = TimeoutSnapshot::read(stream).unwrap();
    assert!(snapshot.keepalive);
    assert_eq!(snapshot.keepalive_time, KEEPALIVE_PERIOD);

    if tcp::USER_TIMEOUT_SUPPORTED {
        assert_eq!(snapshot.user_timeout, Some(tcp::USER_TIMEOUT));
    }

    server.join().unwrap();
}

#[test]
fn test_harden_plain_connection_fails_without_changes() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let before = TimeoutSnapshot::read(&stream).unwrap();

    let conn = PlainConnection::new(stream);
    let result = harden(&conn);
    assert!(matches!(result, Err(tcp::Error::NotSecureTransport { .. })));

    let after = TimeoutSnapshot::read(conn.stream()).unwrap();
    assert_eq!(before, after);
}

/// A connection type the library knows nothing about
struct LoopbackBuffer {
    data: Vec<u8>,
}

impl Connection for LoopbackBuffer {
    fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> conn::Result<bool> {
        Ok(true)
    }

    fn read(&mut self, buf: &mut [u8]) -> conn::Result<usize> {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.drain(..n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> conn::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> conn::Result<()> {
        Ok(())
    }
}

#[test]
fn test_extract_from_foreign_connection_type() {
    let conn = LoopbackBuffer { data: Vec::new() };

    match extract_transport(&conn) {
        Err(tcp::Error::NotSecureTransport { found }) => {
            assert!(found.ends_with("LoopbackBuffer"));
        }
        other => panic!("expected NotSecureTransport, got {:?}", other.map(|_| ())),
    }
}

/// The read path of a hardened connection fails promptly once the peer is gone
#[test]
fn test_hardened_read_fails_on_peer_reset() {
    init_logging();
    let (client, server) = tls_pair();
    let (hardened_tx, hardened_rx) = mpsc::channel::<()>();

    let server = thread::spawn(move || {
        let server_conn = server.join().unwrap();
        hardened_rx.recv().unwrap();

        // Reset instead of a FIN: the peer is simply gone
        let stream = extract_transport(&server_conn).unwrap();
        SockRef::from(stream).set_linger(Some(Duration::ZERO)).unwrap();
        drop(server_conn);
    });

    let mut client: Box<dyn Connection> = Box::new(client);
    harden(client.as_ref()).unwrap();

    // The reset below fails the read with or without hardening, so check
    // the options are in place before the peer goes away
    let snapshot = TimeoutSnapshot::read(extract_transport(client.as_ref()).unwrap()).unwrap();
    assert!(snapshot.keepalive);
    assert_eq!(snapshot.keepalive_time, KEEPALIVE_PERIOD);
    if tcp::USER_TIMEOUT_SUPPORTED {
        assert_eq!(snapshot.user_timeout, Some(tcp::USER_TIMEOUT));
    }

    hardened_tx.send(()).unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 64];
    let result = read_timeout(client.as_mut(), &mut buf, Some(tcp::USER_TIMEOUT * 2));
    let elapsed = start.elapsed();

    assert!(
        matches!(result, Err(conn::Error::Io(_)) | Err(conn::Error::ConnectionClosed)),
        "expected the read to fail, got {:?}",
        result
    );
    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);

    server.join().unwrap();
}
