use crate::*;

use cairn_services::PeerError;

#[tokio::test]
async fn test_download_reproduces_published_bytes() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let alice_dir = scratch_dir("alice");
    let bob_dir = scratch_dir("bob");

    let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(alice_dir.join("photo"), &data)?;

    let mut alice = spawn_peer("alice", registry.addr, &alice_dir).await?;
    let mut bob = spawn_peer("bob", registry.addr, &bob_dir).await?;

    let served_at = alice.publish("photo").await?;
    let (hit, bytes) = bob.download("photo").await?;

    assert_eq!(hit.publisher, "alice");
    assert_eq!(hit.addr, served_at);
    assert_eq!(bytes, data.len() as u64);
    assert_eq!(std::fs::read(bob_dir.join("photo"))?, data);

    alice.leave().await?;
    bob.leave().await?;
    registry.stop().await
}

#[tokio::test]
async fn test_empty_file_round_trips() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let alice_dir = scratch_dir("alice");
    let bob_dir = scratch_dir("bob");
    std::fs::write(alice_dir.join("empty"), b"")?;

    let mut alice = spawn_peer("alice", registry.addr, &alice_dir).await?;
    let mut bob = spawn_peer("bob", registry.addr, &bob_dir).await?;

    alice.publish("empty").await?;
    let (_, bytes) = bob.download("empty").await?;

    assert_eq!(bytes, 0);
    assert_eq!(std::fs::metadata(bob_dir.join("empty"))?.len(), 0);

    alice.leave().await?;
    bob.leave().await?;
    registry.stop().await
}

#[tokio::test]
async fn test_download_republishes_and_spreads_load() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let dirs = [scratch_dir("a"), scratch_dir("b"), scratch_dir("c")];
    std::fs::write(dirs[0].join("tune"), b"la la la")?;

    let mut a = spawn_peer("a", registry.addr, &dirs[0]).await?;
    let mut b = spawn_peer("b", registry.addr, &dirs[1]).await?;
    let mut c = spawn_peer("c", registry.addr, &dirs[2]).await?;

    a.publish("tune").await?;
    let (first, _) = b.download("tune").await?;
    assert_eq!(first.publisher, "a");
    assert_eq!(b.published().len(), 1, "downloaded copy is published");
    assert_eq!(b.list().await?, "tune (by a)\ntune (by b)\n");

    // a has served one hit, b none.
    let (second, _) = c.download("tune").await?;
    assert_eq!(second.publisher, "b");
    assert_eq!(std::fs::read(dirs[2].join("tune"))?, b"la la la");

    a.leave().await?;
    b.leave().await?;
    c.leave().await?;
    registry.stop().await
}

#[tokio::test]
async fn test_unpublish_withdraws_content() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let alice_dir = scratch_dir("alice");
    let bob_dir = scratch_dir("bob");
    std::fs::write(alice_dir.join("doc"), b"draft")?;

    let mut alice = spawn_peer("alice", registry.addr, &alice_dir).await?;
    let mut bob = spawn_peer("bob", registry.addr, &bob_dir).await?;

    alice.publish("doc").await?;
    alice.unpublish("doc").await?;
    assert!(alice.published().is_empty());

    match bob.download("doc").await {
        Err(PeerError::Rejected(reason)) => assert_eq!(reason, "Content not found"),
        other => panic!("expected Content not found, got {other:?}"),
    }
    assert!(!bob_dir.join("doc").exists(), "nothing fetched on a miss");

    assert!(matches!(
        alice.unpublish("doc").await,
        Err(PeerError::NotPublished(_))
    ));

    alice.leave().await?;
    bob.leave().await?;
    registry.stop().await
}

#[tokio::test]
async fn test_duplicate_publish_is_refused_by_registry() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let dir = scratch_dir("alice");
    std::fs::write(dir.join("song"), b"x")?;

    let mut alice = spawn_peer("alice", registry.addr, &dir).await?;
    alice.publish("song").await?;
    match alice.publish("song").await {
        Err(PeerError::Rejected(reason)) => assert_eq!(reason, "Duplicate registration"),
        other => panic!("expected a duplicate rejection, got {other:?}"),
    }
    assert_eq!(alice.published().len(), 1);

    alice.leave().await?;
    registry.stop().await
}

#[tokio::test]
async fn test_leave_clears_all_publications() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let alice_dir = scratch_dir("alice");
    let bob_dir = scratch_dir("bob");
    for name in ["one", "two"] {
        std::fs::write(alice_dir.join(name), name)?;
    }
    std::fs::write(bob_dir.join("three"), b"3")?;

    let mut alice = spawn_peer("alice", registry.addr, &alice_dir).await?;
    let mut bob = spawn_peer("bob", registry.addr, &bob_dir).await?;
    let one = alice.publish("one").await?;
    alice.publish("two").await?;
    bob.publish("three").await?;

    alice.leave().await?;
    assert_eq!(bob.list().await?, "three (by bob)\n");

    // The listener is gone with the publication.
    tokio::task::yield_now().await;
    let refused = tokio::net::TcpStream::connect(SocketAddr::V4(one)).await;
    assert!(refused.is_err(), "listener for a withdrawn item still accepts");

    bob.leave().await?;
    registry.stop().await
}

#[tokio::test]
async fn test_search_times_out_without_registry() -> Result<()> {
    // Bound but never read: requests vanish without a reply.
    let silent = UdpSocket::bind("127.0.0.1:0").await?;
    let dir = scratch_dir("lonely");
    let client = IndexClient::connect(silent.local_addr()?, Duration::from_millis(300)).await?;
    let mut node = PeerNode::new("lonely", client, &dir, Ipv4Addr::LOCALHOST);

    let started = tokio::time::Instant::now();
    let result = node.download("thing").await;

    assert!(matches!(result, Err(PeerError::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(node.published().is_empty());
    assert!(!dir.join("thing").exists());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_downloads_from_one_publisher() -> Result<()> {
    let registry = spawn_registry(10).await?;
    let alice_dir = scratch_dir("alice");
    let data = vec![0xabu8; 64 * 1024];
    std::fs::write(alice_dir.join("big"), &data)?;

    let mut alice = spawn_peer("alice", registry.addr, &alice_dir).await?;
    let addr = alice.publish("big").await?;

    let fetches = (0..4).map(move |i| {
        let dir = scratch_dir(&format!("fetch{i}"));
        tokio::spawn(async move {
            let bytes =
                cairn_services::transfer::download(SocketAddr::V4(addr), "big", &dir).await?;
            Ok::<_, cairn_services::TransferError>((bytes, dir))
        })
    });
    for fetch in fetches.collect::<Vec<_>>() {
        let (bytes, dir) = fetch.await??;
        assert_eq!(bytes, data.len() as u64);
        assert_eq!(std::fs::read(dir.join("big"))?, data);
    }

    alice.leave().await?;
    registry.stop().await
}
