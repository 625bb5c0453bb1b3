use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_OUTBOUND_QUEUE;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting WebSocket connections on /ws.
    Serve(ServeArgs),
    /// Connect to a relay and publish synthetic frame/stats telemetry.
    Mock(MockArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory holding the viewer page. When set, it is served over plain HTTP.
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Socket address for the viewer file server.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub static_listen: SocketAddr,

    /// Echo every message back to its sender instead of relaying it.
    #[arg(long)]
    pub echo: bool,

    /// Messages buffered per connection before the relay drops it as too slow.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    pub outbound_queue: usize,
}

#[derive(Args, Debug, Clone)]
pub struct MockArgs {
    /// WebSocket URL of the relay.
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub server: String,

    /// Milliseconds between frame messages.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,

    /// Send a stats message after this many frames.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub stats_every: u64,

    /// Stop after this many frames instead of running until ctrl-c.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub count: Option<u64>,
}
