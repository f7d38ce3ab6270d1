mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use common::{FakeNetwork, ORIGIN, init_tracing};
use offline_cache::cache::{CacheStore, MemoryCacheStore};
use offline_cache::config::ControllerConfig;
use offline_cache::controller::Controller;
use offline_cache::dispatch::Dispatcher;
use offline_cache::event::Event;
use offline_cache::server::{Server, Startup};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

async fn serve(store: &MemoryCacheStore, network: &Arc<FakeNetwork>) -> SocketAddr {
    init_tracing();
    let controller = Controller::new(
        ControllerConfig::default(),
        Arc::new(store.clone()),
        network.clone(),
    )
    .unwrap();
    let dispatcher = Arc::new(Dispatcher::for_controller(Arc::new(controller)));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    assert_eq!(server.start(&dispatcher).await.unwrap(), Startup::Activated);
    let addr = server.local_addr();
    let network = network.clone();
    tokio::spawn(async move {
        let _ = server
            .run(dispatcher, network, Url::parse(ORIGIN).unwrap())
            .await;
    });
    addr
}

async fn exchange(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn start_installs_and_activates() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    serve(&store, &network).await;
    assert_eq!(store.keys().await.unwrap(), vec!["copycash-v1"]);
}

#[tokio::test]
async fn start_fails_when_install_fails() {
    init_tracing();
    let network = FakeNetwork::site();
    network.set_offline(true);
    let controller = Controller::new(
        ControllerConfig::default(),
        Arc::new(MemoryCacheStore::new()),
        network.clone(),
    )
    .unwrap();
    let dispatcher = Dispatcher::for_controller(Arc::new(controller));
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    assert!(server.start(&dispatcher).await.is_err());
}

#[tokio::test]
async fn serves_precached_assets() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let addr = serve(&store, &network).await;
    network.set_offline(true);

    let response = exchange(
        addr,
        "GET /css/critical.css HTTP/1.1\r\nHost: localhost:8080\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("precached /css/critical.css"));
}

#[tokio::test]
async fn offline_navigation_gets_the_offline_page() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let addr = serve(&store, &network).await;
    network.set_offline(true);

    let response = exchange(
        addr,
        "GET /pricing HTTP/1.1\r\nHost: localhost:8080\r\nAccept: text/html\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("precached /offline.html"));
}

#[tokio::test]
async fn skipped_requests_go_to_the_network() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    network.route("/api/analytics", 202, "application/json", "{}");
    let addr = serve(&store, &network).await;

    let response = exchange(
        addr,
        "POST /api/analytics HTTP/1.1\r\nHost: localhost:8080\r\nContent-Length: 2\r\nConnection: close\r\n\r\n[]",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 202 Accepted\r\n"), "{response}");

    let (_, url, body) = network.requests().pop().unwrap();
    assert_eq!(url, "http://localhost:8080/api/analytics");
    assert_eq!(body, b"[]");
}

#[tokio::test]
async fn unreachable_network_is_a_bad_gateway() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let addr = serve(&store, &network).await;
    network.set_offline(true);

    let response = exchange(
        addr,
        "POST /api/analytics HTTP/1.1\r\nHost: localhost:8080\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{response}");
}

#[tokio::test]
async fn keep_alive_connection_serves_several_requests() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let addr = serve(&store, &network).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /favicon.png HTTP/1.1\r\nHost: localhost:8080\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    let first = String::from_utf8_lossy(&buf[..n]).into_owned();
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "{first}");

    stream
        .write_all(b"GET /scripts/critical.js HTTP/1.1\r\nHost: localhost:8080\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    let second = String::from_utf8(rest).unwrap();
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"), "{second}");
    assert!(second.ends_with("precached /scripts/critical.js"));
}

#[tokio::test]
async fn malformed_request_is_rejected() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let addr = serve(&store, &network).await;

    let response = exchange(addr, "NOT A REQUEST\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
}

#[tokio::test]
async fn waiting_controller_leaves_requests_to_the_network_until_activated() {
    init_tracing();
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let config = ControllerConfig {
        skip_waiting: false,
        ..Default::default()
    };
    let controller = Controller::new(config, Arc::new(store.clone()), network.clone()).unwrap();
    let dispatcher = Arc::new(Dispatcher::for_controller(Arc::new(controller)));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    assert_eq!(server.start(&dispatcher).await.unwrap(), Startup::Waiting);
    let addr = server.local_addr();
    let host_dispatcher = Arc::clone(&dispatcher);
    let origin = network.clone();
    tokio::spawn(async move {
        let _ = server
            .run(dispatcher, origin, Url::parse(ORIGIN).unwrap())
            .await;
    });
    network.set_offline(true);

    let request =
        "GET /css/critical.css HTTP/1.1\r\nHost: localhost:8080\r\nConnection: close\r\n\r\n";
    let before = exchange(addr, request).await;
    assert!(before.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{before}");

    host_dispatcher.dispatch(Event::Activate).await.unwrap();
    let after = exchange(addr, request).await;
    assert!(after.starts_with("HTTP/1.1 200 OK\r\n"), "{after}");
    assert!(after.ends_with("precached /css/critical.css"));
}

#[tokio::test]
async fn overflowing_content_length_is_payload_too_large() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let addr = serve(&store, &network).await;

    let response = exchange(
        addr,
        "POST /api/analytics HTTP/1.1\r\nHost: localhost:8080\r\nContent-Length: 18446744073709551615\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{response}");
    assert!(
        network
            .requests()
            .iter()
            .all(|(_, url, _)| !url.ends_with("/api/analytics"))
    );
}

#[tokio::test]
async fn declared_body_over_request_limit_is_payload_too_large() {
    let store = MemoryCacheStore::new();
    let network = FakeNetwork::site();
    let addr = serve(&store, &network).await;

    let response = exchange(
        addr,
        "POST /api/analytics HTTP/1.1\r\nHost: localhost:8080\r\nContent-Length: 536870912\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{response}");
}
