#[allow(dead_code)]
mod common;

use std::sync::{Arc, Mutex};
use std::thread;

use rand::{Rng, SeedableRng};

use mictcp::{Config, LossyTransport, MemoryTransport, Stack, UdpTransport};

#[test]
fn hello() {
    let server = Stack::udp_with_config("127.0.0.1:0", common::config()).unwrap();
    let client = Stack::udp_with_config("127.0.0.1:0", common::config()).unwrap();

    let (client_handle, server_handle) = common::connect(&client, &server);

    let seq_before = client.info(client_handle).unwrap().send_seq;

    assert_eq!(client.send(client_handle, b"hello").unwrap(), 5);

    let seq_after = client.info(client_handle).unwrap().send_seq;
    assert_eq!(seq_after, 1 - seq_before);

    let mut buf = [0; 64];
    let len = server.recv(server_handle, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"hello");
}

#[test]
fn sequence_bits_alternate() {
    let pair = common::memory_pair(common::config(), common::config());
    let (client_handle, server_handle) = common::connect(&pair.client, &pair.server);

    let seqs = Arc::new(Mutex::new(Vec::new()));

    {
        let seqs = Arc::clone(&seqs);
        pair.client_transport.set_drop_filter(move |frame| {
            if common::is_data_frame(frame) {
                seqs.lock().unwrap().push(common::seq_of(frame));
            }
            false
        });
    }

    for i in 0..8u8 {
        pair.client.send(client_handle, &[i]).unwrap();
    }

    assert_eq!(*seqs.lock().unwrap(), vec![1, 0, 1, 0, 1, 0, 1, 0]);

    let received = common::drain(&pair.server, server_handle);
    assert_eq!(received, (0..8u8).map(|i| vec![i]).collect::<Vec<_>>());
}

#[test]
fn echo_both_directions() {
    const MESSAGE_COUNT: usize = 20;

    let server = Stack::udp_with_config("127.0.0.1:0", common::config()).unwrap();
    let client = Stack::udp_with_config("127.0.0.1:0", common::config()).unwrap();

    let (client_handle, server_handle) = common::connect(&client, &server);

    thread::scope(|s| {
        s.spawn(|| {
            let mut buf = [0; 256];

            for _ in 0..MESSAGE_COUNT {
                let len = server.recv(server_handle, &mut buf).unwrap();
                let reply = buf[..len].to_ascii_uppercase();
                server.send(server_handle, &reply).unwrap();
            }
        });

        let mut buf = [0; 256];

        for i in 0..MESSAGE_COUNT {
            let message = format!("message {}", i);

            client.send(client_handle, message.as_bytes()).unwrap();

            let len = client.recv(client_handle, &mut buf).unwrap();
            assert_eq!(&buf[..len], message.to_ascii_uppercase().as_bytes());
        }
    });
}

#[test]
fn recv_truncates_to_buffer() {
    let pair = common::memory_pair(common::config(), common::config());
    let (client_handle, server_handle) = common::connect(&pair.client, &pair.server);

    pair.client.send(client_handle, b"truncated").unwrap();
    pair.client.send(client_handle, b"next").unwrap();

    let mut buf = [0; 5];
    assert_eq!(pair.server.recv(server_handle, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"trunc");

    let len = pair.server.recv(server_handle, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"next");
}

#[test]
fn lossy_stream_digest() {
    const CHUNK_COUNT: usize = 150;

    let (client_end, server_end) = MemoryTransport::pair(
        common::CLIENT_ADDR.parse().unwrap(),
        common::SERVER_ADDR.parse().unwrap(),
    );

    let config = Config {
        reliability: 100,
        ..common::config()
    };

    let client_transport = LossyTransport::with_seed(client_end, 20, 1);
    let server_transport = LossyTransport::with_seed(server_end, 20, 2);

    let client = Stack::with_transport(client_transport, config.clone());
    let server = Stack::with_transport(server_transport, config);

    let (client_handle, server_handle) = common::connect(&client, &server);

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let chunks: Vec<Vec<u8>> = (0..CHUNK_COUNT)
        .map(|_| {
            let len = rng.gen_range(1..=1000);
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect();

    let mut sent = md5::Context::new();
    for chunk in chunks.iter() {
        sent.consume(chunk);
    }
    let sent_digest = sent.compute();

    thread::scope(|s| {
        let receiver = s.spawn(|| {
            let mut received = md5::Context::new();
            let mut buf = [0; 1024];

            for _ in 0..CHUNK_COUNT {
                let len = server.recv(server_handle, &mut buf).unwrap();
                received.consume(&buf[..len]);
            }

            received.compute()
        });

        for chunk in chunks.iter() {
            assert_eq!(client.send(client_handle, chunk).unwrap(), chunk.len());
        }

        assert_eq!(receiver.join().unwrap(), sent_digest);
    });

    assert_eq!(client.info(client_handle).unwrap().loss_distance, 0);
}

#[test]
fn udp_through_lossy_transport() {
    let server = Stack::udp_with_config("127.0.0.1:0", common::config()).unwrap();

    let socket = UdpTransport::bind("127.0.0.1:0").unwrap();
    let transport = LossyTransport::with_seed(socket, 30, 3);
    let client = Stack::with_transport(transport, common::config());

    let (client_handle, server_handle) = common::connect(&client, &server);

    for i in 0..20u32 {
        client.send(client_handle, &i.to_be_bytes()).unwrap();
    }

    let received = common::drain(&server, server_handle);
    let expected: Vec<Vec<u8>> = (0..20u32).map(|i| i.to_be_bytes().to_vec()).collect();

    assert_eq!(received, expected);
}
