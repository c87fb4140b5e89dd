//! Command line interface for the `mllp` binary.
//!
//! Shared with `build.rs` for man page generation, so it depends on nothing
//! beyond `clap` and the standard library.

use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

/// Command line arguments for the `mllp` binary.
#[derive(Debug, Parser)]
#[command(name = "mllp", version, about = "Send and receive HL7 messages over MLLP")]
pub struct Cli {
    /// Expose Prometheus metrics on this address.
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Milliseconds to wait for a frame to start.
    #[arg(long, global = true, default_value_t = 15_000)]
    pub receive_timeout_ms: u64,

    /// Milliseconds to wait between bytes once a frame has started.
    #[arg(long, global = true, default_value_t = 5_000)]
    pub read_timeout_ms: u64,

    /// Validate HL7 payloads before handling them.
    #[arg(long, global = true)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of the `mllp` binary.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept connections and acknowledge every message received.
    Listen {
        /// Address to listen on.
        #[arg(short, long, default_value = "127.0.0.1:2575")]
        bind: SocketAddr,

        /// Connections served at once; further connections are reset.
        #[arg(long, default_value_t = 5)]
        max_connections: usize,
    },
    /// Send the contents of a file and print the acknowledgement.
    Send {
        /// Address of the receiving system.
        #[arg(short, long)]
        addr: SocketAddr,

        /// File holding one HL7 message. Line endings are converted to
        /// segment delimiters.
        file: PathBuf,

        /// Do not wait for an acknowledgement.
        #[arg(long)]
        no_ack: bool,
    },
}
