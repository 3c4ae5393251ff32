//! Integration tests: send a file to localhost over real UDP and verify it
//! arrives intact.
//!
//! Each test runs a full sender and receiver on threads, flushes into a
//! temporary directory, and compares the output byte-for-byte. Loss is
//! injected deterministically through the sender's loss hook, never through
//! real randomness.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use blast_transfer::sender::LossHook;
use blast_transfer::{
    DirSink, MemoryStore, Receiver, ReceiverConfig, Sender, SenderConfig, TransferStats,
    UdpTransport,
};

/// Patterned test payload; a prime modulus keeps records distinguishable.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn loopback_transfer(
    name: &str,
    file: Vec<u8>,
    record_size: u16,
    blast_size: u32,
    hook: Option<LossHook>,
) -> TransferStats {
    let out_base = std::env::temp_dir().join(format!("blast_transfer_loopback_{}", name));
    let _ = fs::remove_dir_all(&out_base);

    // bind before the sender exists so the handshake cannot race the socket
    let recv_transport = UdpTransport::bind(0).expect("bind receiver");
    let port = recv_transport.local_addr().expect("local addr").port();
    let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

    let sink = DirSink::new(&out_base);
    let config = ReceiverConfig {
        linger: Duration::from_millis(300),
        poll: Duration::from_millis(50),
    };
    let recv_handle = thread::spawn(move || Receiver::new(recv_transport, sink, config).run());

    let store = MemoryStore::from_bytes(file.clone(), record_size);
    let transport = UdpTransport::connect(peer).expect("sender socket");
    let mut sender = Sender::new(
        transport,
        store,
        SenderConfig {
            blast_size,
            ..SenderConfig::new(format!("{}.bin", name))
        },
    );
    if let Some(hook) = hook {
        sender = sender.with_loss_hook(hook);
    }
    let send_handle = thread::spawn(move || sender.run());

    let stats = send_handle.join().expect("sender panicked").expect("sender failed");
    let result = recv_handle.join().expect("receiver panicked").expect("receiver failed");

    assert_eq!(result.file_size, file.len() as u64);
    let output = fs::read(&result.path).expect("read output");
    assert_eq!(output.len(), file.len(), "file sizes differ");
    assert_eq!(output, file, "file contents differ");

    let _ = fs::remove_dir_all(&out_base);
    stats
}

#[test]
fn tiny_file_clean_channel() {
    // 100 bytes in one 512-byte record: a single blast, a single DATA frame
    let stats = loopback_transfer("tiny", pattern(100), 512, 1000, None);
    assert_eq!(stats.blasts, 1);
    assert_eq!(stats.data_packets_sent, 1);
    assert_eq!(stats.retransmits, 0);
    assert_eq!(stats.packets_dropped, 0);
}

#[test]
fn exact_record_multiple() {
    // 2048 bytes = exactly 4 records, still one frame
    let stats = loopback_transfer("exact", pattern(2048), 512, 1000, None);
    assert_eq!(stats.blasts, 1);
    assert_eq!(stats.data_packets_sent, 1);
}

#[test]
fn multi_blast_with_trailing_byte() {
    // 3 full blasts of 1000 records plus a single extra byte
    let len = 3 * 1000 * 512 + 1;
    let stats = loopback_transfer("multiblast", pattern(len), 512, 1000, None);
    assert_eq!(stats.blasts, 4);
}

#[test]
fn recovers_from_injected_loss() {
    // drop every 6th DATA datagram; each repair round shrinks the miss set
    let mut n = 0u64;
    let hook: LossHook = Box::new(move || {
        n += 1;
        n % 6 == 0
    });
    let stats = loopback_transfer("lossy", pattern(100_000), 256, 200, Some(hook));
    assert!(stats.packets_dropped > 0);
    assert!(stats.retransmits > 0);
}

#[test]
fn empty_file_transfers_cleanly() {
    let stats = loopback_transfer("empty", Vec::new(), 512, 1000, None);
    assert_eq!(stats.blasts, 0);
    assert_eq!(stats.data_packets_sent, 0);
}
