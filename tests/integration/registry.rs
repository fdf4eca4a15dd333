use crate::*;

use std::net::SocketAddrV4;

use cairn_core::wire::{Kind, SimpleRecord, CONTROL_RECORD_LEN};

fn publisher_addr(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn register(peer: &str, content: &str, port: u16) -> ControlRecord {
    ControlRecord::new(Kind::Register, peer, content).with_addr(publisher_addr(port))
}

fn ack(text: &str) -> Reply {
    Reply::Simple(SimpleRecord::acknowledge(text))
}

fn error(text: &str) -> Reply {
    Reply::Simple(SimpleRecord::error(text))
}

async fn online(socket: &UdpSocket) -> Result<String> {
    match send_record(socket, ControlRecord::new(Kind::Online, "", "")).await? {
        Reply::Simple(SimpleRecord {
            kind: Kind::Online,
            text,
        }) => Ok(text),
        other => anyhow::bail!("expected an Online listing, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let socket = raw_socket(registry.addr).await?;

    assert_eq!(send_record(&socket, register("alice", "song", 1)).await?, ack("Registered"));
    assert_eq!(
        send_record(&socket, register("alice", "song", 2)).await?,
        error("Duplicate registration")
    );
    assert_eq!(online(&socket).await?, "song (by alice)\n");

    registry.stop().await
}

#[tokio::test]
async fn test_capacity_limit_and_freed_slot() -> Result<()> {
    let registry = spawn_registry(2).await?;
    let socket = raw_socket(registry.addr).await?;

    send_record(&socket, register("a", "x", 1)).await?;
    send_record(&socket, register("b", "x", 2)).await?;
    assert_eq!(
        send_record(&socket, register("c", "x", 3)).await?,
        error("Server storage full")
    );

    assert_eq!(
        send_record(&socket, ControlRecord::new(Kind::Deregister, "a", "x")).await?,
        ack("Deregistered")
    );
    assert_eq!(send_record(&socket, register("c", "x", 3)).await?, ack("Registered"));
    assert_eq!(
        send_record(&socket, register("d", "x", 4)).await?,
        error("Server storage full")
    );

    registry.stop().await
}

#[tokio::test]
async fn test_search_picks_least_used_publisher() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let socket = raw_socket(registry.addr).await?;
    let search = || ControlRecord::new(Kind::Search, "me", "x");

    send_record(&socket, register("A", "x", 1)).await?;
    send_record(&socket, search()).await?;
    send_record(&socket, search()).await?;
    send_record(&socket, register("B", "x", 2)).await?;
    send_record(&socket, register("C", "x", 3)).await?;

    let mut picked = Vec::new();
    for _ in 0..3 {
        match send_record(&socket, search()).await? {
            Reply::Control(hit) => {
                assert_eq!(hit.kind, Kind::Search);
                picked.push((hit.peer_name, hit.addr));
            }
            other => anyhow::bail!("expected a search hit, got {other:?}"),
        }
    }
    assert_eq!(
        picked,
        vec![
            ("B".to_string(), Some(publisher_addr(2))),
            ("C".to_string(), Some(publisher_addr(3))),
            ("B".to_string(), Some(publisher_addr(2))),
        ]
    );

    assert_eq!(
        send_record(&socket, ControlRecord::new(Kind::Search, "me", "y")).await?,
        error("Content not found")
    );

    registry.stop().await
}

#[tokio::test]
async fn test_quit_removes_only_the_issuers_entries() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let socket = raw_socket(registry.addr).await?;

    send_record(&socket, register("P1", "X", 1)).await?;
    send_record(&socket, register("P1", "Y", 2)).await?;
    send_record(&socket, register("P2", "Z", 3)).await?;
    assert_eq!(
        online(&socket).await?,
        "X (by P1)\nY (by P1)\nZ (by P2)\n"
    );

    assert_eq!(
        send_record(&socket, ControlRecord::new(Kind::Quit, "P1", "")).await?,
        ack("Quit")
    );
    assert_eq!(online(&socket).await?, "Z (by P2)\n");

    send_record(&socket, ControlRecord::new(Kind::Quit, "P2", "")).await?;
    assert_eq!(online(&socket).await?, "No content registered");

    registry.stop().await
}

#[tokio::test]
async fn test_deregister_unknown_entry() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let socket = raw_socket(registry.addr).await?;

    assert_eq!(
        send_record(&socket, ControlRecord::new(Kind::Deregister, "a", "x")).await?,
        error("No such registration")
    );

    registry.stop().await
}

#[tokio::test]
async fn test_unknown_kind_leaves_catalog_unchanged() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let socket = raw_socket(registry.addr).await?;
    send_record(&socket, register("a", "x", 1)).await?;

    let mut datagram = register("b", "y", 2).encode();
    datagram[0] = b'Z';
    assert_eq!(send_raw(&socket, &datagram).await?, error("Unknown request"));
    assert_eq!(online(&socket).await?, "x (by a)\n");

    registry.stop().await
}

#[tokio::test]
async fn test_malformed_datagrams_get_no_reply() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let socket = raw_socket(registry.addr).await?;
    let record = register("a", "x", 1).encode();

    socket.send(&record[..CONTROL_RECORD_LEN - 1]).await?;
    assert!(no_reply_within(&socket, Duration::from_millis(300)).await);

    let mut oversized = record.clone();
    oversized.extend_from_slice(&[0u8; 8]);
    socket.send(&oversized).await?;
    assert!(no_reply_within(&socket, Duration::from_millis(300)).await);

    // The registry is still serving and stored nothing.
    assert_eq!(online(&socket).await?, "No content registered");

    registry.stop().await
}

#[tokio::test]
async fn test_replies_go_to_each_requester() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let first = raw_socket(registry.addr).await?;
    let second = raw_socket(registry.addr).await?;

    assert_eq!(send_record(&first, register("a", "x", 1)).await?, ack("Registered"));
    assert_eq!(
        send_record(&second, register("a", "x", 1)).await?,
        error("Duplicate registration")
    );
    assert!(no_reply_within(&first, Duration::from_millis(200)).await);

    registry.stop().await
}
