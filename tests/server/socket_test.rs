//! End-to-end traffic over bound Unix sockets.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use weir::config::SocketsConfig;
use weir::kernel::store::{TagRequest, TagStore};
use weir::server::cache::HostCache;
use weir::server::egress::EgressPolicy;
use weir::server::protocol::Decision;
use weir::server::{send_observation, send_query, PolicyServer, ServerError};
use weir::types::Principal;

fn sockets(dir: &std::path::Path) -> SocketsConfig {
    SocketsConfig {
        query: dir.join("run").join("weir.sock"),
        dns: dir.join("run").join("weir_dns.sock"),
        mode: 0o600,
    }
}

#[tokio::test]
async fn observe_then_query_over_sockets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TagStore::new());
    let value = store
        .create_tag(
            &Principal::new("pkg"),
            &TagRequest {
                domains: Some(vec!["example.com".to_string()]),
                ..TagRequest::named("t")
            },
        )
        .value();
    let hosts = Arc::new(HostCache::new());
    let policy = EgressPolicy::new(store, Arc::clone(&hosts));

    let server = Arc::new(PolicyServer::bind(&sockets(dir.path()), policy).expect("bind"));
    let mode = std::fs::metadata(server.query_path())
        .expect("stat")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    let running = Arc::clone(&server);
    let task = tokio::spawn(async move { running.run().await });

    let request = format!("socket;203.0.113.5;10050;4242;{value}");
    assert_eq!(
        send_query(server.query_path(), &request).await.expect("query"),
        Decision::Deny
    );

    send_observation(server.dns_path(), "getaddrinfo;203.0.113.5;example.com")
        .await
        .expect("observe");
    // The observation is applied by another task; wait for it.
    for _ in 0..50 {
        if hosts.lookup("203.0.113.5").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        send_query(server.query_path(), &request).await.expect("query"),
        Decision::Allow
    );
    assert_eq!(
        send_query(server.query_path(), "short;line").await.expect("query"),
        Decision::Allow
    );

    task.abort();
}

#[tokio::test]
async fn replaced_instance_keeps_serving_after_old_one_drops() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = sockets(dir.path());
    let policy = || EgressPolicy::new(Arc::new(TagStore::new()), Arc::new(HostCache::new()));

    let old = PolicyServer::bind(&config, policy()).expect("first bind");
    // The old instance's socket files are still on disk.
    let live = Arc::new(PolicyServer::bind(&config, policy()).expect("rebind over stale socket"));
    let running = Arc::clone(&live);
    let task = tokio::spawn(async move { running.run().await });

    drop(old);
    assert!(config.query.exists());
    assert!(config.dns.exists());
    assert_eq!(
        send_query(live.query_path(), "a;b;c").await.expect("query after old drop"),
        Decision::Allow
    );

    task.abort();
    let _ = task.await;
    drop(live);
    assert!(!config.query.exists());
    assert!(!config.dns.exists());
}

#[tokio::test]
async fn broken_connection_does_not_disturb_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let policy = EgressPolicy::new(Arc::new(TagStore::new()), Arc::new(HostCache::new()));
    let server = Arc::new(PolicyServer::bind(&sockets(dir.path()), policy).expect("bind"));
    let running = Arc::clone(&server);
    let task = tokio::spawn(async move { running.run().await });

    let idle = UnixStream::connect(server.query_path()).await.expect("idle connect");

    let mut bad = UnixStream::connect(server.query_path()).await.expect("bad connect");
    bad.write_all(b"\xff\xfe;x\n").await.expect("write invalid utf-8");
    let mut reply = Vec::new();
    bad.read_to_end(&mut reply).await.expect("read to eof");
    assert!(reply.is_empty(), "no reply expected, got {reply:?}");

    assert_eq!(
        send_query(server.query_path(), "a;b;c").await.expect("fresh query"),
        Decision::Allow
    );

    let (reader, mut writer) = idle.into_split();
    writer.write_all(b"a;b;c\n").await.expect("idle write");
    let mut line = String::new();
    BufReader::new(reader)
        .read_line(&mut line)
        .await
        .expect("idle read");
    assert_eq!(line, "0\n");

    task.abort();
}

#[tokio::test]
async fn regular_file_at_socket_path_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = sockets(dir.path());
    std::fs::create_dir_all(config.query.parent().expect("parent")).expect("mkdir");
    std::fs::write(&config.query, b"keep me").expect("write");

    let result = PolicyServer::bind(
        &config,
        EgressPolicy::new(Arc::new(TagStore::new()), Arc::new(HostCache::new())),
    );
    assert!(matches!(result, Err(ServerError::NotASocket { .. })));
    assert_eq!(std::fs::read(&config.query).expect("read"), b"keep me");
}

#[tokio::test]
async fn query_to_missing_socket_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = send_query(&dir.path().join("absent.sock"), "socket;1.2.3.4;1;2;3").await;
    assert!(matches!(result, Err(ServerError::Io { .. })));
}
