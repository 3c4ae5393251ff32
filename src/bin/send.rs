//! `blast-send` — push a file to a waiting receiver.
//!
//! Owns only process setup: argument parsing and validation, logging, and the
//! garbler wiring. All protocol work happens in the library.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use blast_transfer::protocol::{DEFAULT_BLAST_SIZE, DEFAULT_RECORD_SIZE};
use blast_transfer::sender::LossHook;
use blast_transfer::{MemoryStore, Sender, SenderConfig, UdpTransport};

/// Send a file over the blast transfer protocol.
#[derive(Parser, Debug)]
#[command(name = "blast-send")]
struct Args {
    /// Receiver IP address.
    receiver_ip: IpAddr,
    /// Receiver UDP port.
    receiver_port: u16,
    /// File to send.
    filename: PathBuf,
    /// Record size in bytes (256, 512, or 1024).
    #[arg(default_value_t = DEFAULT_RECORD_SIZE)]
    record_size: u16,
    /// Records per blast (200 to 10000).
    #[arg(default_value_t = DEFAULT_BLAST_SIZE)]
    blast_size: u32,
    /// Probability of synthetically dropping each DATA datagram (0.0 to 1.0).
    #[arg(default_value_t = 0.0)]
    loss_rate: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blast_transfer=info".into()),
        )
        .init();

    let args = Args::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        process::exit(1);
    });

    if let Err(e) = run(args) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if ![256, 512, 1024].contains(&args.record_size) {
        bail!("record size must be 256, 512, or 1024");
    }
    if !(200..=10_000).contains(&args.blast_size) {
        bail!("blast size must be between 200 and 10000");
    }
    if !(0.0..=1.0).contains(&args.loss_rate) {
        bail!("loss rate must be between 0.0 and 1.0");
    }

    // the wire carries the bare name, never the local path
    let wire_name = args
        .filename
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if wire_name.is_empty() {
        bail!("{} does not name a file", args.filename.display());
    }

    let store = MemoryStore::from_file(&args.filename, args.record_size)
        .with_context(|| format!("cannot read {}", args.filename.display()))?;

    let peer = SocketAddr::new(args.receiver_ip, args.receiver_port);
    let transport = UdpTransport::connect(peer).context("cannot create UDP socket")?;

    let config = SenderConfig {
        blast_size: args.blast_size,
        ..SenderConfig::new(wire_name)
    };
    let mut sender = Sender::new(transport, store, config);
    if args.loss_rate > 0.0 {
        sender = sender.with_loss_hook(garbler(args.loss_rate));
    }

    let stats = sender.run()?;
    println!("{}", stats);
    Ok(())
}

/// Pseudo-random loss predicate used to exercise the recovery path.
fn garbler(rate: f64) -> LossHook {
    let mut rng = StdRng::from_entropy();
    Box::new(move || rng.gen::<f64>() < rate)
}
