
use std::fs;
use std::sync::Arc;

use harness::{handshake, raw_routes, roundtrip, RecordingBackend, RouterHandle};
use minetd_router::{ReloadPolicy, Reloader, RouteError, RouteSource};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn reload_redirects_new_connections_only() {
    let old_backend = RecordingBackend::spawn().await.unwrap();
    let new_backend = RecordingBackend::spawn().await.unwrap();
    let router = RouterHandle::spawn(&[("example.com", old_backend.port())])
        .await
        .unwrap();

    let frame = handshake("example.com", 25565);
    let mut established = TcpStream::connect(router.listen_addr).await.unwrap();
    established.write_all(&frame).await.unwrap();
    let mut echoed = vec![0u8; frame.len()];
    established.read_exact(&mut echoed).await.unwrap();

    router
        .route_table
        .reload(raw_routes(&[("example.com", new_backend.port())]))
        .unwrap();

    let echoed = roundtrip(router.listen_addr, &frame, frame.len())
        .await
        .unwrap();
    assert_eq!(echoed, frame);
    assert_eq!(new_backend.connection_count(), 1);

    // The connection made before the reload keeps its backend.
    established.write_all(b"ping").await.unwrap();
    let mut pong = [0u8; 4];
    established.read_exact(&mut pong).await.unwrap();
    assert_eq!(&pong, b"ping");
    assert_eq!(old_backend.connection_count(), 1);
}

#[tokio::test]
async fn empty_reload_keeps_serving_previous_routes() {
    let backend = RecordingBackend::spawn().await.unwrap();
    let router = RouterHandle::spawn(&[("example.com", backend.port())])
        .await
        .unwrap();

    let result = router.route_table.reload(raw_routes(&[("example.com", 0)]));
    assert_eq!(result, Err(RouteError::EmptyConfig));

    let frame = handshake("example.com", 25565);
    let echoed = roundtrip(router.listen_addr, &frame, frame.len())
        .await
        .unwrap();
    assert_eq!(echoed, frame);
}

#[tokio::test]
async fn reloader_reads_routes_file() {
    let alpha = RecordingBackend::spawn().await.unwrap();
    let beta = RecordingBackend::spawn().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("minetd.conf");
    fs::write(&path, format!("# routes\nalpha.test   {}\n", alpha.port())).unwrap();

    let source = RouteSource::new(Some(path.clone()));
    let (_, table) = source.load_table().unwrap();
    let router = RouterHandle::spawn(&[]).await.unwrap();
    router.route_table.replace(table);

    let reloader = Reloader::new(source, Arc::clone(&router.route_table), ReloadPolicy::Exit);

    fs::write(&path, format!("beta.test {}\n", beta.port())).unwrap();
    assert_eq!(reloader.reload().unwrap(), 1);

    let frame = handshake("beta.test", 25565);
    let echoed = roundtrip(router.listen_addr, &frame, frame.len())
        .await
        .unwrap();
    assert_eq!(echoed, frame);
    assert_eq!(alpha.connection_count(), 0);
}
