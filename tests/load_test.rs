//! Load testing for the tunnel proxy.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

#[tokio::test]
async fn test_concurrent_tunnels() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::proxy_config(backend, false)).await;

    let concurrency = 50;
    let start = Instant::now();

    let mut tasks = Vec::with_capacity(concurrency);
    for i in 0..concurrency {
        let addr = proxy.addr;
        tasks.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let payload = format!("tunnel-{}-", i).repeat(100);
            let mut request = format!("POST /api/dmos/echo/{} HTTP/1.1\r\nHost: p\r\n\r\n", i).into_bytes();
            request.extend_from_slice(payload.as_bytes());
            stream.write_all(&request).await.unwrap();
            stream.shutdown().await.unwrap();

            let mut response = Vec::new();
            stream.read_to_end(&mut response).await.unwrap();
            assert!(response.starts_with(common::OK_HEAD));
            assert_eq!(&response[common::OK_HEAD.len()..], payload.as_bytes());
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let elapsed = start.elapsed();
    println!("{} tunnels in {:?}", concurrency, elapsed);
    assert!(elapsed < Duration::from_secs(10));

    common::wait_for_idle(&proxy.tracker).await;
}

#[tokio::test]
async fn test_shutdown_drains_with_deadline() {
    let backend = common::start_echo_backend().await;
    let mut config = common::proxy_config(backend, false);
    config.timeouts.drain_ms = 300;
    let proxy = common::start_proxy(config).await;

    // Hold one tunnel open past shutdown.
    let mut held = TcpStream::connect(proxy.addr).await.unwrap();
    held.write_all(b"GET /api/dmos/hold HTTP/1.1\r\nHost: p\r\n\r\n").await.unwrap();
    let mut head = vec![0u8; common::OK_HEAD.len()];
    held.read_exact(&mut head).await.unwrap();
    assert_eq!(proxy.tracker.active_count(), 1);

    let started = Instant::now();
    proxy.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), proxy.handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));

    // New connections are refused once the listener is gone.
    assert!(TcpStream::connect(proxy.addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_returns_promptly_when_idle() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::proxy_config(backend, false)).await;

    proxy.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), proxy.handle)
        .await
        .expect("idle server did not stop")
        .unwrap()
        .unwrap();
}
