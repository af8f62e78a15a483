use std::net;
use std::sync::Arc;
use std::thread;
use std::time;

use mictcp::frame::{serial, PduKind};
use mictcp::{Config, Handle, MemoryTransport, Mode, Stack};

pub const CLIENT_ADDR: &str = "127.0.0.1:5000";
pub const SERVER_ADDR: &str = "127.0.0.1:6000";

/// Short timeouts, so that loss recovery does not dominate test time.
pub fn config() -> Config {
    Config {
        ack_timeout_ms: 20,
        handshake_timeout_ms: 200,
        handshake_retries: 5,
        ..Default::default()
    }
}

pub struct MemoryPair {
    pub client_transport: Arc<MemoryTransport>,
    pub client: Stack,
    pub server_transport: Arc<MemoryTransport>,
    pub server: Stack,
}

pub fn memory_pair(client_config: Config, server_config: Config) -> MemoryPair {
    let (client_end, server_end) = MemoryTransport::pair(
        CLIENT_ADDR.parse().unwrap(),
        SERVER_ADDR.parse().unwrap(),
    );

    let client_transport = Arc::new(client_end);
    let server_transport = Arc::new(server_end);

    MemoryPair {
        client: Stack::with_transport(Arc::clone(&client_transport), client_config),
        server: Stack::with_transport(Arc::clone(&server_transport), server_config),
        client_transport,
        server_transport,
    }
}

/// Opens a connection on each stack and completes a handshake between them.
pub fn connect(client: &Stack, server: &Stack) -> (Handle, Handle) {
    let server_handle = server.open(Mode::Server).unwrap();
    let client_handle = client.open(Mode::Client).unwrap();
    let server_addr: net::SocketAddr = server.local_addr();

    thread::scope(|s| {
        let acceptor = s.spawn(|| server.accept(server_handle).unwrap());

        client.connect(client_handle, server_addr).unwrap();

        // Without a dispatcher, the client only answers a repeated SYN+ACK while it receives
        while !acceptor.is_finished() {
            let _ = client.recv_timeout(client_handle, &mut [], time::Duration::from_millis(20));
        }

        assert_eq!(acceptor.join().unwrap(), client.local_addr());
    });

    (client_handle, server_handle)
}

pub fn kind_of(frame: &[u8]) -> Option<PduKind> {
    serial::read(frame).ok().map(|pdu| pdu.kind())
}

pub fn is_data_frame(frame: &[u8]) -> bool {
    kind_of(frame) == Some(PduKind::Data)
}

pub fn payload_of(frame: &[u8]) -> Vec<u8> {
    serial::read(frame).unwrap().payload.to_vec()
}

pub fn seq_of(frame: &[u8]) -> u32 {
    serial::read(frame).unwrap().header.seq_num
}

/// Reads messages until none arrives within a short wait.
pub fn drain(stack: &Stack, handle: Handle) -> Vec<Vec<u8>> {
    let mut buf = [0; serial::PAYLOAD_SIZE_MAX];
    let mut messages = Vec::new();

    while let Some(len) = stack
        .recv_timeout(handle, &mut buf, time::Duration::from_millis(300))
        .unwrap()
    {
        messages.push(buf[..len].to_vec());
    }

    messages
}
