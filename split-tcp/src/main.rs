//! Entry point for `split-tcp`.
//!
//! Parses CLI arguments and runs one of the three roles.  All protocol work
//! is delegated to library modules; `main.rs` owns only process setup
//! (logging, argument parsing, building the configuration).

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use split_tcp::{Endpoints, FileSink, HopConfig, Receiver, Relay, Sender, SplitTcpConfig};

/// Split-TCP file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    opts: ProtocolOpts,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Send a file through the relay.
    Sender {
        /// File to transfer.
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Relay between sender and receiver; runs until killed.
    Relay,
    /// Receive files; runs until killed.
    Receiver {
        /// Where each received session is written.
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },
}

/// Settings every role must agree on; there is no handshake.
#[derive(Args)]
struct ProtocolOpts {
    /// Host all six channel endpoints live on.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: IpAddr,
    /// End-to-end window W, in packets.
    #[arg(long, global = true, default_value_t = 10)]
    window: usize,
    /// Maximum segment size in bytes.
    #[arg(long, global = true, default_value_t = 1024)]
    mss: usize,
    /// Initial slow-start threshold, in segments.
    #[arg(long, global = true, default_value_t = 8)]
    ssthresh: usize,
    /// Sender → relay retransmission timeout, in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    data_rto_ms: u64,
    /// Relay → receiver retransmission timeout, in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    forward_rto_ms: u64,
    /// Drop probability of sender → relay data.
    #[arg(long, global = true, default_value_t = 0.1)]
    data_loss: f64,
    /// Drop probability of relay → receiver data.
    #[arg(long, global = true, default_value_t = 0.1)]
    forward_loss: f64,
    /// Drop probability of relay → sender local acks.
    #[arg(long, global = true, default_value_t = 0.0)]
    relay_ack_loss: f64,
    /// Drop probability of relay → sender end-to-end acks.
    #[arg(long, global = true, default_value_t = 0.0)]
    e2e_ack_loss: f64,
    /// Drop probability of receiver → relay local acks.
    #[arg(long, global = true, default_value_t = 0.1)]
    receiver_ack_loss: f64,
    /// Seed for the loss generators, for reproducible runs.
    #[arg(long, global = true)]
    seed: Option<u64>,
}

impl ProtocolOpts {
    fn into_config(self) -> SplitTcpConfig {
        SplitTcpConfig {
            endpoints: Endpoints::on_host(self.host),
            window: self.window,
            mss: self.mss,
            initial_ssthresh: self.ssthresh,
            data_hop: HopConfig {
                rto: Duration::from_millis(self.data_rto_ms),
                loss: self.data_loss,
                max_attempts: None,
            },
            forward_hop: HopConfig {
                rto: Duration::from_millis(self.forward_rto_ms),
                loss: self.forward_loss,
                max_attempts: None,
            },
            relay_ack_loss: self.relay_ack_loss,
            e2e_ack_loss: self.e2e_ack_loss,
            receiver_ack_loss: self.receiver_ack_loss,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.opts.into_config();
    config.validate().context("invalid configuration")?;

    match cli.role {
        Role::Sender { file } => {
            let mut sender = Sender::bind(&config).await.context("binding sender sockets")?;
            let report = sender
                .send_file(&file)
                .await
                .with_context(|| format!("sending {}", file.display()))?;
            log::info!("sent {} byte(s) in {:?}", report.bytes, report.elapsed);
        }
        Role::Relay => {
            let relay = Relay::bind(&config).await.context("binding relay sockets")?;
            relay.run().await.context("relay stopped")?;
        }
        Role::Receiver { output } => {
            let receiver = Receiver::bind(&config, FileSink::new(output))
                .await
                .context("binding receiver socket")?;
            receiver.run().await.context("receiver stopped")?;
        }
    }
    Ok(())
}
