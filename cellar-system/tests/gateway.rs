mod common;

use anyhow::Result;
use cellar_system::gateway::{claim, Claim, ForwardRequest};
use cellar_system::{owner_channel, OwnerEvent};
use std::fs;
use std::time::Duration;
use tokio::time::timeout;

async fn primary(path: &std::path::Path) -> cellar_system::GatewayServer {
    match claim(path, None).await {
        Ok(Claim::Primary(server)) => server,
        Ok(Claim::Forwarded) => panic!("expected to become primary"),
        Err(e) => panic!("claim failed: {}", e),
    }
}

#[tokio::test]
async fn test_second_instance_forwards_relative_file() -> Result<()> {
    common::init_tracing();
    let home = tempfile::tempdir()?;
    fs::create_dir(home.path().join("games"))?;
    fs::write(home.path().join("games/setup.exe"), "installer")?;
    let socket = home.path().join("cellar.sock");

    let server = primary(&socket).await;
    let (owner, mut events) = owner_channel();
    let serving = tokio::spawn(server.serve(owner));

    let request = ForwardRequest::new(home.path(), "games/setup.exe");
    assert!(matches!(claim(&socket, Some(&request)).await?, Claim::Forwarded));

    match timeout(Duration::from_secs(5), events.recv()).await? {
        Some(OwnerEvent::OpenFile(path)) => assert_eq!(path, home.path().join("games/setup.exe")),
        other => panic!("Expected OpenFile, got {:?}", other),
    }

    serving.abort();
    let _ = serving.await;
    assert!(!socket.exists());
    Ok(())
}

#[tokio::test]
async fn test_bad_requests_are_dropped_and_server_keeps_serving() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("app.exe"), "")?;
    let socket = dir.path().join("cellar.sock");

    let server = primary(&socket).await;
    let (owner, mut events) = owner_channel();
    let serving = tokio::spawn(server.serve(owner));

    // Missing directory, no match, then a connection without a file.
    claim(&socket, Some(&ForwardRequest::new(dir.path(), "missing/app.exe"))).await?;
    claim(&socket, Some(&ForwardRequest::new(dir.path(), "other.exe"))).await?;
    claim(&socket, None).await?;
    claim(&socket, Some(&ForwardRequest::new(dir.path(), "app.exe"))).await?;

    match timeout(Duration::from_secs(5), events.recv()).await? {
        Some(OwnerEvent::OpenFile(path)) => assert_eq!(path, dir.path().join("app.exe")),
        other => panic!("Expected OpenFile, got {:?}", other),
    }
    assert!(events.try_recv().is_err());

    serving.abort();
    let _ = serving.await;
    Ok(())
}

#[tokio::test]
async fn test_server_stops_when_owner_is_gone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let socket = dir.path().join("cellar.sock");
    let server = primary(&socket).await;
    let (owner, events) = owner_channel();
    let serving = tokio::spawn(server.serve(owner));

    drop(events);
    // The accept loop notices on the next connection.
    claim(&socket, None).await?;
    timeout(Duration::from_secs(5), serving).await??;
    assert!(!socket.exists());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_starts_bind_exactly_once() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("setup.exe"), "installer")?;
    let socket = dir.path().join("cellar.sock");
    let request = ForwardRequest::new(dir.path(), "setup.exe");

    let (first, second) = tokio::join!(claim(&socket, Some(&request)), claim(&socket, Some(&request)));
    let (server, other) = match (first?, second?) {
        (Claim::Primary(server), other) | (other, Claim::Primary(server)) => (server, other),
        (Claim::Forwarded, Claim::Forwarded) => panic!("nobody became primary"),
    };
    assert!(matches!(other, Claim::Forwarded), "both instances became primary");

    // The loser's request is waiting on the winner's socket.
    let (owner, mut events) = owner_channel();
    let serving = tokio::spawn(server.serve(owner));
    match timeout(Duration::from_secs(5), events.recv()).await? {
        Some(OwnerEvent::OpenFile(path)) => assert_eq!(path, dir.path().join("setup.exe")),
        other => panic!("Expected OpenFile, got {:?}", other),
    }

    serving.abort();
    let _ = serving.await;
    assert!(!socket.exists());
    Ok(())
}
