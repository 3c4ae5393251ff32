//! `blast-recv` — wait for one transfer and write the file under
//! `received_files/<timestamp>/`.

use std::process;

use anyhow::Context;
use clap::Parser;

use blast_transfer::{DirSink, Receiver, ReceiverConfig, UdpTransport};

/// Receive one file over the blast transfer protocol.
#[derive(Parser, Debug)]
#[command(name = "blast-recv")]
struct Args {
    /// UDP port to listen on.
    port: u16,
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
    let transport = UdpTransport::bind(args.port)
        .with_context(|| format!("cannot bind UDP port {}", args.port))?;
    let sink = DirSink::new("received_files");

    let receiver = Receiver::new(transport, sink, ReceiverConfig::default());
    let result = receiver.run()?;

    println!(
        "received {} bytes in {:.3} s -> {}",
        result.file_size,
        result.elapsed.as_secs_f64(),
        result.path.display()
    );
    Ok(())
}
