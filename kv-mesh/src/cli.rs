use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::tcp::HostConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a host in a fully replicated key-value mesh", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a host and a node server on it, then open the REPL.
    Serve(HostArgs),
    /// Start a bare host without a server. Another host can bring it up.
    Shell(HostArgs),
}

impl Command {
    pub fn host_args(&self) -> &HostArgs {
        match self {
            Command::Serve(args) | Command::Shell(args) => args,
        }
    }

    pub fn starts_server(&self) -> bool {
        matches!(self, Command::Serve(_))
    }
}

#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Socket address this host listens on, e.g. 127.0.0.1:7101.
    #[arg(long, default_value = "127.0.0.1:7101")]
    pub listen: SocketAddr,

    /// Comma-separated addresses of hosts already in the mesh.
    #[arg(long, value_delimiter = ',')]
    pub join: Vec<String>,

    /// Give up on a synchronous call after this many milliseconds. Waits forever if unset.
    #[arg(long)]
    pub call_timeout_ms: Option<u64>,

    /// Timeout for opening a connection to a peer.
    #[arg(long, default_value_t = 1000)]
    pub connect_timeout_ms: u64,
}

impl HostArgs {
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            listen: self.listen,
            call_timeout: self.call_timeout_ms.map(Duration::from_millis),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}
