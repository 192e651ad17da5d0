//! CLI entry point for running one host of the key-value mesh.
//!
//! # Example usage
//!
//! ```bash
//! # Terminal 1: first host, serving on its own
//! cargo run --bin node -- serve --listen 127.0.0.1:7101
//!
//! # Terminal 2: joins the first host and bootstraps from it
//! cargo run --bin node -- serve --listen 127.0.0.1:7102 --join 127.0.0.1:7101
//!
//! # Terminal 3: a bare host, started from terminal 1 with `bringup 127.0.0.1:7103`
//! cargo run --bin node -- shell --listen 127.0.0.1:7103
//! ```

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use kv_mesh::cli::Cli;
use kv_mesh::client::Client;
use kv_mesh::membership::NodeId;
use kv_mesh::protocol::ConsoleCommand;
use kv_mesh::tcp::TcpHost;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let args = cli.command.host_args();
    let host = TcpHost::bind(args.host_config())
        .with_context(|| format!("failed to bind {}", args.listen))?;

    for seed in &args.join {
        if let Err(err) = host.join(&NodeId::from(seed.as_str())) {
            warn!(peer = %seed, error = %err, "failed to join");
        }
    }

    let _server = if cli.command.starts_server() {
        Some(host.start_local_server().context("failed to start node server")?)
    } else {
        None
    };

    run_repl(&host)
}

/// Reads commands from stdin until EXIT or end of input.
fn run_repl(host: &TcpHost) -> Result<()> {
    let client = host.client();
    println!("Host {} ready. Type HELP (or h) for commands.", host.id());

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Exit) => break,
            Ok(command) => execute(host, &client, command),
            Err(err) => println!("ERROR: {err}"),
        }
    }

    info!(host = %host.id(), "shell exiting");
    Ok(())
}

fn execute(host: &TcpHost, client: &Client, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Add { key, value } => match client.add(key.clone(), value.clone()) {
            Ok(node) => println!("OK: {key} = {value} (via {node})"),
            Err(err) => println!("ERROR: {err}"),
        },
        ConsoleCommand::Fetch { key } => match client.fetch(key.clone()) {
            Ok(Some(value)) => println!("{key} = {value}"),
            Ok(None) => println!("{key} not found"),
            Err(err) => println!("ERROR: {err}"),
        },
        ConsoleCommand::BringUp { target } => {
            match client.bring_up_node(&NodeId::from(target.as_str())) {
                Ok(node) => println!("Started server on {node}"),
                Err(err) => println!("ERROR: {err}"),
            }
        }
        ConsoleCommand::Peers => {
            let peers = host.statuses();
            println!("Mesh ({} hosts):", peers.len());
            for peer in peers {
                let role = if peer.serving { "serving" } else { "shell" };
                let marker = if &peer.id == host.id() { ", this host" } else { "" };
                println!("  {} ({role}{marker})", peer.id);
            }
        }
        ConsoleCommand::Store => match client.snapshot(host.id()) {
            Ok(store) if store.is_empty() => println!("Store: empty"),
            Ok(store) => {
                for entry in store.entries() {
                    println!("  {} = {}", entry.key, entry.value);
                }
            }
            Err(err) => println!("ERROR: {err}"),
        },
        ConsoleCommand::StopMesh => {
            let stopped = client.stop_mesh();
            println!("Stopped {} server(s)", stopped.len());
        }
        ConsoleCommand::Help => {
            println!("Commands (case-insensitive):");
            println!("  ADD <key> <value>  (alias: a)  -- store on a random node");
            println!("  FETCH <key>        (alias: f)  -- read from a random node");
            println!("  BRINGUP <addr>     (alias: b)  -- start a server on another host");
            println!("  PEERS              (alias: p)  -- list hosts in the mesh");
            println!("  STORE              (alias: s)  -- show this host's store");
            println!("  STOP                           -- stop every server in the mesh");
            println!("  HELP               (alias: h)  -- show this message");
            println!("  EXIT               (alias: e)  -- leave the shell");
        }
        ConsoleCommand::Exit => {}
    }
}
