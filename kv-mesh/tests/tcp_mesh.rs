//! Integration tests for hosts talking over real TCP connections.
//!
//! Hosts bind ephemeral ports on localhost. Replication travels on per-peer
//! links, separate from the connections client calls use, so reads on other
//! hosts are polled until they converge.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use kv_mesh::membership::{Membership, NodeId};
use kv_mesh::message::Request;
use kv_mesh::runtime::NodeHandle;
use kv_mesh::tcp::{HostConfig, TcpHost};
use kv_mesh::transport::Transport;
use kv_mesh::MeshError;

fn spawn_host() -> Result<TcpHost> {
    let config = HostConfig {
        call_timeout: Some(Duration::from_secs(5)),
        ..HostConfig::new("127.0.0.1:0".parse()?)
    };
    Ok(TcpHost::bind(config)?)
}

/// Polls `check` until it returns true or `timeout` elapses.
fn wait_until(timeout: Duration, mut check: impl FnMut() -> Result<bool>) -> Result<()> {
    let start = Instant::now();
    loop {
        if check()? {
            return Ok(());
        }
        if start.elapsed() > timeout {
            anyhow::bail!("condition not reached within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn shutdown(host: &TcpHost, handles: Vec<NodeHandle>) {
    host.client().stop_mesh();
    for handle in handles {
        handle.join();
    }
}

#[test]
fn test_single_host_add_then_fetch() -> Result<()> {
    let a = spawn_host()?;
    let handle = a.start_local_server()?;
    let client = a.client();

    assert_eq!(client.add("x", "1")?, *a.id());
    assert_eq!(client.fetch("x")?, Some("1".to_string()));
    assert_eq!(client.fetch("missing")?, None);

    shutdown(&a, vec![handle]);
    Ok(())
}

#[test]
fn test_join_forms_full_mesh() -> Result<()> {
    let a = spawn_host()?;
    let b = spawn_host()?;
    let c = spawn_host()?;

    b.join(a.id())?;
    c.join(b.id())?;

    for (host, others) in [(&a, [&b, &c]), (&b, [&a, &c]), (&c, [&a, &b])] {
        for other in others {
            assert!(
                host.peers().contains(other.id()),
                "{} should know {}",
                host.id(),
                other.id()
            );
        }
    }
    Ok(())
}

#[test]
fn test_bring_up_remote_host_then_replicate() -> Result<()> {
    let a = spawn_host()?;
    let handle = a.start_local_server()?;
    let b = spawn_host()?;
    let client = a.client();

    let started = client.bring_up_node(b.id())?;
    assert_eq!(started, *b.id());
    assert!(b.is_serving());
    assert_eq!(a.peers().current_peers(), vec![b.id().clone()]);
    assert!(client.snapshot(b.id())?.is_empty());

    client.add_on(a.id(), "y", "2")?;
    wait_until(Duration::from_secs(5), || {
        Ok(client.fetch_from(b.id(), "y")? == Some("2".to_string()))
    })?;

    shutdown(&a, vec![handle]);
    Ok(())
}

#[test]
fn test_joining_server_bootstraps_from_existing_data() -> Result<()> {
    let a = spawn_host()?;
    let handle_a = a.start_local_server()?;
    let client = a.client();
    client.add("x", "1")?;
    client.add("y", "2")?;

    let b = spawn_host()?;
    b.join(a.id())?;
    let handle_b = b.start_local_server()?;

    assert_eq!(client.snapshot(b.id())?, client.snapshot(a.id())?);

    shutdown(&a, vec![handle_a, handle_b]);
    Ok(())
}

#[test]
fn test_overwrite_reaches_every_host() -> Result<()> {
    let a = spawn_host()?;
    let handle_a = a.start_local_server()?;
    let b = spawn_host()?;
    b.join(a.id())?;
    let handle_b = b.start_local_server()?;
    let c = spawn_host()?;
    c.join(a.id())?;
    let handle_c = c.start_local_server()?;

    let client = a.client();
    client.add_on(b.id(), "x", "1")?;
    // Writes fanned out by different hosts are not ordered against each other.
    for host in [&a, &c] {
        wait_until(Duration::from_secs(5), || {
            Ok(client.fetch_from(host.id(), "x")? == Some("1".to_string()))
        })?;
    }
    client.add_on(c.id(), "x", "2")?;

    for host in [&a, &b, &c] {
        wait_until(Duration::from_secs(5), || {
            Ok(client.fetch_from(host.id(), "x")? == Some("2".to_string()))
        })?;
    }

    shutdown(&a, vec![handle_a, handle_b, handle_c]);
    Ok(())
}

#[test]
fn test_back_to_back_casts_keep_send_order() -> Result<()> {
    let a = spawn_host()?;
    let handle_a = a.start_local_server()?;
    let b = spawn_host()?;
    b.join(a.id())?;
    let handle_b = b.start_local_server()?;

    let rounds = 100;
    for round in 0..rounds {
        for value in 0..10 {
            a.send(
                b.id(),
                Request::ReplicateItem {
                    key: format!("k{round}"),
                    value: value.to_string(),
                },
            )?;
        }
    }

    let client = a.client();
    wait_until(Duration::from_secs(10), || {
        Ok(client.snapshot(b.id())?.len() == rounds)
    })?;
    let store = client.snapshot(b.id())?;
    for round in 0..rounds {
        let key = format!("k{round}");
        assert_eq!(
            store.fetch_item(&key).map(String::as_str),
            Some("9"),
            "{key} ended on an older write"
        );
    }

    shutdown(&a, vec![handle_a, handle_b]);
    Ok(())
}

#[test]
fn test_burst_of_writes_through_one_host_converges() -> Result<()> {
    let a = spawn_host()?;
    let handle_a = a.start_local_server()?;
    let b = spawn_host()?;
    b.join(a.id())?;
    let handle_b = b.start_local_server()?;
    let c = spawn_host()?;
    c.join(a.id())?;
    let handle_c = c.start_local_server()?;

    let client = a.client();
    for value in 0..50 {
        client.add_on(a.id(), "x", value.to_string())?;
    }

    for host in [&b, &c] {
        wait_until(Duration::from_secs(5), || {
            Ok(client.fetch_from(host.id(), "x")? == Some("49".to_string()))
        })?;
    }
    // The last write is final once it has arrived.
    thread::sleep(Duration::from_millis(100));
    for host in [&b, &c] {
        assert_eq!(client.fetch_from(host.id(), "x")?, Some("49".to_string()));
    }

    shutdown(&a, vec![handle_a, handle_b, handle_c]);
    Ok(())
}

#[test]
fn test_shell_host_is_never_picked() -> Result<()> {
    let a = spawn_host()?;
    let handle_a = a.start_local_server()?;
    let shell = spawn_host()?;
    shell.join(a.id())?;

    assert!(a.peers().contains(shell.id()));
    assert!(a.peers().current_peers().is_empty());
    assert_eq!(shell.peers().current_peers(), vec![a.id().clone()]);

    let client = a.client();
    for i in 0..40 {
        assert_eq!(client.add(format!("k{i}"), format!("v{i}"))?, *a.id());
    }
    for i in 0..40 {
        assert_eq!(client.fetch(format!("k{i}"))?, Some(format!("v{i}")));
    }
    assert_eq!(shell.client().fetch("k0")?, Some("v0".to_string()));

    // A server joining later must bootstrap from a, never from the shell.
    let c = spawn_host()?;
    c.join(shell.id())?;
    let handle_c = c.start_local_server()?;
    assert_eq!(client.snapshot(c.id())?, client.snapshot(a.id())?);

    let mut peers = shell.client().peers();
    peers.sort();
    let mut expected = vec![a.id().clone(), c.id().clone()];
    expected.sort();
    assert_eq!(peers, expected);

    shutdown(&a, vec![handle_a, handle_c]);
    Ok(())
}

#[test]
fn test_stop_mesh_unregisters_servers() -> Result<()> {
    let a = spawn_host()?;
    let handle_a = a.start_local_server()?;
    let b = spawn_host()?;
    b.join(a.id())?;
    let handle_b = b.start_local_server()?;

    let mut stopped = a.client().stop_mesh();
    stopped.sort();
    let mut expected = vec![a.id().clone(), b.id().clone()];
    expected.sort();
    assert_eq!(stopped, expected);

    assert!(!a.is_serving());
    assert!(!b.is_serving());
    assert!(a.peers().current_peers().is_empty());
    assert!(b.peers().current_peers().is_empty());
    assert!(handle_a.join().is_some());
    assert!(handle_b.join().is_some());
    Ok(())
}

#[test]
fn test_unreachable_peer() -> Result<()> {
    let a = spawn_host()?;
    let ghost = NodeId::from("127.0.0.1:1");

    let err = a.client().fetch_from(&ghost, "x").unwrap_err();
    assert!(matches!(err, MeshError::PeerUnreachable(node) if node == ghost));
    Ok(())
}
