//! End-to-end tests for the proxy
//!
//! Each test runs a real listener on 127.0.0.1 and fake targets or a fake
//! downstream proxy on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tunproxy::inbound::{HttpListener, InboundListener, CONNECT_ESTABLISHED};
use tunproxy::outbound::{Direct, HttpProxy, OutboundProxy};
use tunproxy::rule::DomainAllowlist;
use tunproxy::statistic::{ActiveTasks, ThroughputStats};
use tunproxy::tunnel::{RelayMode, Tunnel};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    stats: Arc<ThroughputStats>,
    tasks: Arc<ActiveTasks>,
}

async fn start_proxy(
    allowed: &[&str],
    outbound: Arc<dyn OutboundProxy>,
    configure: impl FnOnce(Tunnel) -> Tunnel,
) -> Harness {
    let stats = Arc::new(ThroughputStats::new());
    let tasks = Arc::new(ActiveTasks::new());
    let tunnel = Tunnel::new(
        DomainAllowlist::new(allowed.iter().copied()),
        outbound,
        stats.clone(),
        tasks.clone(),
    );
    let tunnel = Arc::new(configure(tunnel));

    let listener = Arc::new(HttpListener::bind("127.0.0.1:0", tunnel).await.unwrap());
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { listener.start().await });

    Harness { addr, stats, tasks }
}

async fn read_until_header_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    head
}

async fn read_established(client: &mut TcpStream) {
    let mut welcome = vec![0u8; CONNECT_ESTABLISHED.len()];
    timeout(WAIT, client.read_exact(&mut welcome))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(welcome, CONNECT_ESTABLISHED);
}

#[tokio::test]
async fn test_connect_allowed_direct() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    let proxy = start_proxy(&["127.0.0.1"], Arc::new(Direct::new()), |t| t).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!(
        "CONNECT 127.0.0.1:{0} HTTP/1.1\r\nHost: 127.0.0.1:{0}\r\n\r\n",
        target_port
    );
    client.write_all(request.as_bytes()).await.unwrap();
    read_established(&mut client).await;

    let (mut upstream, _) = timeout(WAIT, target.accept()).await.unwrap().unwrap();

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    upstream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    upstream.write_all(b"pong").await.unwrap();
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test]
async fn test_blocked_domain_gets_nothing() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    let proxy = start_proxy(&["example.com"], Arc::new(Direct::new()), |t| t).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", target_port);
    client.write_all(request.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    let _ = timeout(WAIT, client.read_to_end(&mut received))
        .await
        .unwrap();
    assert!(received.is_empty());

    assert!(timeout(Duration::from_millis(200), target.accept())
        .await
        .is_err());
}

#[tokio::test]
async fn test_plain_http_forwarded_unmodified() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    let proxy = start_proxy(&["127.0.0.1"], Arc::new(Direct::new()), |t| t).await;

    let request = format!(
        "GET /index.html HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nUser-Agent: test\r\n\r\n",
        target_port
    );
    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();

    let (mut upstream, _) = timeout(WAIT, target.accept()).await.unwrap().unwrap();
    let mut forwarded = vec![0u8; request.len()];
    upstream.read_exact(&mut forwarded).await.unwrap();
    assert_eq!(forwarded, request.as_bytes());

    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    upstream.write_all(response).await.unwrap();
    drop(upstream);

    let mut received = Vec::new();
    timeout(WAIT, client.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, response);
}

#[tokio::test]
async fn test_plain_http_strip_www_prefix() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    let proxy = start_proxy(&["localhost"], Arc::new(Direct::new()), |t| {
        t.with_request_reader(
            tunproxy::inbound::RequestReader::new().with_strip_www_prefix(true),
        )
    })
    .await;

    let request = format!("GET / HTTP/1.1\r\nHost: www.localhost:{}\r\n\r\n", target_port);
    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();

    let (mut upstream, _) = timeout(WAIT, target.accept()).await.unwrap().unwrap();
    let mut forwarded = vec![0u8; request.len()];
    upstream.read_exact(&mut forwarded).await.unwrap();
    assert_eq!(forwarded, request.as_bytes());
}

#[tokio::test]
async fn test_plain_http_disabled() {
    let proxy = start_proxy(&["127.0.0.1"], Arc::new(Direct::new()), |t| {
        t.with_plain_http(false)
    })
    .await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: 127.0.0.1:1\r\n\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    let _ = timeout(WAIT, client.read_to_end(&mut received))
        .await
        .unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_connect_chained_through_downstream_proxy() {
    let downstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let downstream_addr = downstream.local_addr().unwrap();
    let outbound = Arc::new(HttpProxy::new(
        downstream_addr.ip().to_string(),
        downstream_addr.port(),
    ));
    let proxy = start_proxy(&["example.com"], outbound, |t| t).await;

    let request = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
    let reply = b"HTTP/1.1 200 Connection established\r\n\r\n";

    let fake = tokio::spawn(async move {
        let (mut stream, _) = downstream.accept().await.unwrap();
        let head = read_until_header_end(&mut stream).await;
        stream.write_all(reply).await.unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(&buf).await.unwrap();
        head
    });

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(request).await.unwrap();
    read_established(&mut client).await;

    let mut forwarded_reply = vec![0u8; reply.len()];
    timeout(WAIT, client.read_exact(&mut forwarded_reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded_reply, reply);

    client.write_all(b"hello").await.unwrap();
    let mut echoed = [0u8; 5];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hello");

    let replayed = timeout(WAIT, fake).await.unwrap().unwrap();
    assert_eq!(replayed, request);
}

#[tokio::test]
async fn test_plain_http_chained_without_handshake() {
    let downstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let downstream_addr = downstream.local_addr().unwrap();
    let outbound = Arc::new(HttpProxy::new(
        downstream_addr.ip().to_string(),
        downstream_addr.port(),
    ));
    let proxy = start_proxy(&["example.com"], outbound, |t| t).await;

    let request: &'static [u8] =
        b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";
    let response: &'static [u8] = b"HTTP/1.1 204 No Content\r\n\r\n";

    let fake = tokio::spawn(async move {
        let (mut stream, _) = downstream.accept().await.unwrap();
        let head = read_until_header_end(&mut stream).await;
        stream.write_all(response).await.unwrap();
        head
    });

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(request).await.unwrap();

    // no welcome line and no CONNECT replay: the downstream proxy gets the
    // request itself and its answer is relayed as is
    let forwarded = timeout(WAIT, fake).await.unwrap().unwrap();
    assert_eq!(forwarded, request);

    let mut received = vec![0u8; response.len()];
    timeout(WAIT, client.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, response);
}

#[tokio::test]
async fn test_relay_preserves_byte_order() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    let proxy = start_proxy(&["127.0.0.1"], Arc::new(Direct::new()), |t| t).await;

    tokio::spawn(async move {
        let (stream, _) = target.accept().await.unwrap();
        let (mut read, mut write) = stream.into_split();
        tokio::io::copy(&mut read, &mut write).await.unwrap();
        write.shutdown().await.unwrap();
    });

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", target_port);
    client.write_all(request.as_bytes()).await.unwrap();
    read_established(&mut client).await;

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let (mut read, mut write) = client.into_split();
    let sent = payload.clone();
    let writer = tokio::spawn(async move {
        write.write_all(&sent).await.unwrap();
        write.shutdown().await.unwrap();
    });

    let mut echoed = Vec::new();
    timeout(WAIT, read.read_to_end(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    writer.await.unwrap();

    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload);

    let snapshot = proxy.stats.snapshot();
    assert_eq!(snapshot.upload_bytes, payload.len() as u64);
    assert_eq!(snapshot.download_bytes, payload.len() as u64);
}

#[tokio::test]
async fn test_idle_timeout_closes_session() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    let proxy = start_proxy(&["127.0.0.1"], Arc::new(Direct::new()), |t| {
        t.with_relay(RelayMode::Idle, Duration::from_millis(200))
    })
    .await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", target_port);
    client.write_all(request.as_bytes()).await.unwrap();
    read_established(&mut client).await;

    // Target accepts and never speaks
    let (_silent, _) = timeout(WAIT, target.accept()).await.unwrap().unwrap();

    let mut received = Vec::new();
    let _ = timeout(WAIT, client.read_to_end(&mut received))
        .await
        .unwrap();
    assert!(received.is_empty());

    let snapshot = proxy.stats.snapshot();
    assert_eq!(snapshot.upload_bytes, 0);
    assert_eq!(snapshot.download_bytes, 0);

    let deadline = tokio::time::Instant::now() + WAIT;
    while proxy.tasks.count() != 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(proxy.tasks.count(), 0);
}
