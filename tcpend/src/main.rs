//! Entry point for `tcpend`.
//!
//! Parses CLI arguments and runs either the **send** or the **recv** side
//! of one transfer.  All protocol work is delegated to the library;
//! `main.rs` owns only process setup (logging, argument parsing, file I/O).

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Env, Target};

use tcpend::link::TRACE_TARGET;
use tcpend::{Receiver, ReceiverConfig, Sender, SenderConfig, Socket};

/// TCP-like reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a listening receiver.
    Send {
        /// Local UDP port to bind.
        #[arg(short = 'p', long)]
        port: u16,
        /// IP address of the receiver.
        #[arg(short = 's', long = "remote-ip")]
        remote_ip: IpAddr,
        /// UDP port of the receiver.
        #[arg(short = 'a', long = "remote-port")]
        remote_port: u16,
        /// File to send.
        #[arg(short = 'f', long)]
        file: PathBuf,
        /// Maximum payload bytes per segment.
        #[arg(short = 'm', long)]
        mtu: usize,
        /// Sliding window size, in segments.
        #[arg(short = 'c', long)]
        sws: usize,
    },
    /// Receive one file and write it out.
    Recv {
        /// Local UDP port to listen on.
        #[arg(short = 'p', long)]
        port: u16,
        /// Maximum payload bytes per segment.
        #[arg(short = 'm', long)]
        mtu: usize,
        /// Sliding window size, in segments.
        #[arg(short = 'c', long)]
        sws: usize,
        /// Where to write the received file.
        #[arg(short = 'f', long)]
        file: PathBuf,
    },
}

/// Route everything to stdout; segment trace lines are printed bare.
fn init_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .format(|buf, record| {
            if record.target() == TRACE_TARGET {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
            }
        })
        .init();
}

async fn bind(port: u16) -> Result<Socket> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    Socket::bind(addr)
        .await
        .with_context(|| format!("binding UDP port {port}"))
}

async fn run(mode: Mode) -> Result<()> {
    match mode {
        Mode::Send {
            port,
            remote_ip,
            remote_port,
            file,
            mtu,
            sws,
        } => {
            let payload = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let socket = bind(port).await?;
            let config = SenderConfig::new(SocketAddr::new(remote_ip, remote_port), mtu, sws);

            let stats = Sender::new(config, socket, payload).run().await?;
            println!("{stats}");
        }
        Mode::Recv {
            port,
            mtu,
            sws,
            file,
        } => {
            let socket = bind(port).await?;
            let out = tokio::fs::File::create(&file)
                .await
                .with_context(|| format!("creating {}", file.display()))?;
            let config = ReceiverConfig::new(mtu, sws);

            let stats = Receiver::new(config, socket, out).run().await?;
            println!("{stats}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG controls verbosity; trace lines are logged at info.
    init_logging();

    let cli = Cli::parse();
    match run(cli.mode).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
