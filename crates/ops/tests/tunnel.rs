#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use yard_core::ResourceObject;
use yard_kubehub::{MemoryStore, StoreOp};
use tokio::sync::oneshot;
use yard_ops::{PodForwarder, TunnelError, TunnelManager, TunnelState, Upstream};

fn pod(name: &str, phase: &str) -> ResourceObject {
    ResourceObject::from_value(serde_json::json!({
        "apiVersion": "v1", "kind": "Pod",
        "metadata": {"name": name, "namespace": "backyards-system", "labels": {"app": "backyards"}},
        "status": {"phase": phase}
    }))
    .unwrap()
}

fn selector() -> BTreeMap<String, String> {
    let mut s = BTreeMap::new();
    s.insert("app".to_string(), "backyards".to_string());
    s
}

async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let (mut r, mut w) = conn.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Stands in for the API server: every connection goes to a local echo server.
struct EchoForwarder {
    target: SocketAddr,
    calls: AtomicUsize,
    pods: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl PodForwarder for EchoForwarder {
    async fn connect(&self, _namespace: &str, pod: &str, _port: u16) -> anyhow::Result<Upstream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pods.lock().unwrap().push(pod.to_string());
        Ok(Upstream::direct(TcpStream::connect(self.target).await?))
    }
}

/// Accepts the first `healthy` dials, then refuses the upgrade.
struct RefusingForwarder {
    target: SocketAddr,
    healthy: usize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl PodForwarder for RefusingForwarder {
    async fn connect(&self, _: &str, _: &str, _: u16) -> anyhow::Result<Upstream> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy { anyhow::bail!("upgrade refused") }
        Ok(Upstream::direct(TcpStream::connect(self.target).await?))
    }
}

/// Every connection's transport breaks shortly after it is established.
struct BreakingForwarder {
    target: SocketAddr,
}

#[async_trait::async_trait]
impl PodForwarder for BreakingForwarder {
    async fn connect(&self, _: &str, _: &str, _: u16) -> anyhow::Result<Upstream> {
        let stream = TcpStream::connect(self.target).await?;
        let (tx, failed) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(anyhow::anyhow!("stream reset by peer"));
        });
        Ok(Upstream { stream: Box::new(stream), failed })
    }
}

async fn tunnel_with(forwarder: Arc<dyn PodForwarder>) -> yard_ops::Tunnel {
    let store = Arc::new(MemoryStore::new());
    store.insert(pod("backyards-0", "Running"));
    let manager = TunnelManager::new(store, forwarder).with_bind_address("127.0.0.1");
    manager.create(&selector(), "backyards-system", 0, 80).await.unwrap()
}

async fn setup(pods: Vec<ResourceObject>) -> (Arc<MemoryStore>, Arc<EchoForwarder>, TunnelManager) {
    let store = Arc::new(MemoryStore::new());
    for p in pods { store.insert(p); }
    let forwarder = Arc::new(EchoForwarder { target: echo_server().await, calls: AtomicUsize::new(0), pods: Default::default() });
    let manager = TunnelManager::new(store.clone(), forwarder.clone()).with_bind_address("127.0.0.1");
    (store, forwarder, manager)
}

async fn round_trip(port: u16, payload: &[u8]) -> Vec<u8> {
    let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    conn.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    conn.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn no_running_pod_fails_before_any_forwarding() {
    let (store, forwarder, manager) = setup(vec![pod("a", "Pending"), pod("b", "Pending")]).await;
    let err = manager.create(&selector(), "backyards-system", 0, 80).await.err().unwrap();
    assert!(err.is_not_found(), "{}", err);
    assert!(matches!(err, TunnelError::NoRunningPod { ref selector, .. } if selector == "app=backyards"));
    assert_eq!(forwarder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.ops(), vec![StoreOp::List("Pod".into())]);
}

#[tokio::test]
async fn first_running_pod_is_chosen() {
    let (_store, _fwd, manager) = setup(vec![pod("a-pending", "Pending"), pod("b-running", "Running"), pod("c-running", "Running")]).await;
    let tunnel = manager.create(&selector(), "backyards-system", 0, 80).await.unwrap();
    assert_eq!(tunnel.pod_name(), "b-running");
    assert_eq!(tunnel.state(), TunnelState::Created);
}

#[tokio::test]
async fn tunnel_forwards_bytes_until_stopped() {
    let (_store, forwarder, manager) = setup(vec![pod("backyards-0", "Running")]).await;
    let tunnel = manager.create(&selector(), "backyards-system", 0, 80).await.unwrap();
    tunnel.run().await.unwrap();
    assert_eq!(tunnel.state(), TunnelState::Running);
    assert_eq!(tunnel.url("/api/graphql"), format!("http://127.0.0.1:{}/api/graphql", tunnel.local_port()));

    assert_eq!(round_trip(tunnel.local_port(), b"ping").await, b"ping");
    assert_eq!(round_trip(tunnel.local_port(), b"pong").await, b"pong");
    // one dial at startup, then one per connection
    assert_eq!(forwarder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(*forwarder.pods.lock().unwrap(), vec!["backyards-0"; 3]);

    tunnel.stop();
    tunnel.stop();
    tokio::time::timeout(Duration::from_secs(5), tunnel.wait_for_stop()).await.unwrap().unwrap();
    assert_eq!(tunnel.state(), TunnelState::Stopped);
    assert!(TcpStream::connect(("127.0.0.1", tunnel.local_port())).await.is_err());
}

#[tokio::test]
async fn sequential_ephemeral_tunnels_do_not_collide() {
    let (_store, _fwd, manager) = setup(vec![pod("backyards-0", "Running")]).await;
    let first = manager.create(&selector(), "backyards-system", 0, 80).await.unwrap();
    first.run().await.unwrap();
    let second = manager.create(&selector(), "backyards-system", 0, 80).await.unwrap();
    second.run().await.unwrap();

    assert_ne!(first.local_port(), second.local_port());
    assert_eq!(round_trip(first.local_port(), b"one").await, b"one");
    assert_eq!(round_trip(second.local_port(), b"two").await, b"two");
    first.stop();
    second.stop();
}

#[tokio::test]
async fn stop_before_run_is_safe() {
    let (_store, _fwd, manager) = setup(vec![pod("backyards-0", "Running")]).await;
    let tunnel = manager.create(&selector(), "backyards-system", 0, 80).await.unwrap();
    tunnel.stop();
    assert!(matches!(tunnel.run().await, Err(TunnelError::Stopped)));
    tunnel.wait_for_stop().await.unwrap();
}

#[tokio::test]
async fn occupied_explicit_port_fails_run_and_releases_waiters() {
    let (_store, _fwd, manager) = setup(vec![pod("backyards-0", "Running")]).await;
    let squatter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = squatter.local_addr().unwrap().port();

    let tunnel = manager.create(&selector(), "backyards-system", port, 80).await.unwrap();
    let err = tunnel.run().await.unwrap_err();
    assert!(matches!(err, TunnelError::Bind { port: p, .. } if p == port), "{}", err);
    assert_eq!(tunnel.state(), TunnelState::Stopped);
    tokio::time::timeout(Duration::from_secs(1), tunnel.wait_for_stop()).await.unwrap().unwrap();
}

#[tokio::test]
async fn unreachable_pod_fails_run() {
    let forwarder = Arc::new(RefusingForwarder { target: echo_server().await, healthy: 0, calls: AtomicUsize::new(0) });
    let tunnel = tunnel_with(forwarder).await;
    let err = tunnel.run().await.unwrap_err();
    assert!(matches!(err, TunnelError::Forward(ref m) if m.contains("upgrade refused")), "{}", err);
    assert_eq!(tunnel.state(), TunnelState::Stopped);
    tokio::time::timeout(Duration::from_secs(1), tunnel.wait_for_stop()).await.unwrap().unwrap();
}

#[tokio::test]
async fn refused_upstream_stops_a_running_tunnel() {
    let forwarder = Arc::new(RefusingForwarder { target: echo_server().await, healthy: 1, calls: AtomicUsize::new(0) });
    let tunnel = tunnel_with(forwarder).await;
    tunnel.run().await.unwrap();

    let _conn = TcpStream::connect(("127.0.0.1", tunnel.local_port())).await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), tunnel.wait_for_stop()).await.unwrap().unwrap_err();
    assert!(matches!(err, TunnelError::Forward(ref m) if m.contains("upgrade refused")), "{}", err);
    assert_eq!(tunnel.state(), TunnelState::Stopped);
}

#[tokio::test]
async fn broken_transport_stops_the_tunnel() {
    let tunnel = tunnel_with(Arc::new(BreakingForwarder { target: echo_server().await })).await;
    tunnel.run().await.unwrap();
    assert_eq!(tunnel.state(), TunnelState::Running);

    let _conn = TcpStream::connect(("127.0.0.1", tunnel.local_port())).await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), tunnel.wait_for_stop()).await.unwrap().unwrap_err();
    assert!(matches!(err, TunnelError::Forward(ref m) if m.contains("stream reset by peer")), "{}", err);
    assert_eq!(tunnel.state(), TunnelState::Stopped);
    assert!(TcpStream::connect(("127.0.0.1", tunnel.local_port())).await.is_err());
}

#[tokio::test]
async fn run_twice_is_rejected() {
    let (_store, _fwd, manager) = setup(vec![pod("backyards-0", "Running")]).await;
    let tunnel = manager.create(&selector(), "backyards-system", 0, 80).await.unwrap();
    tunnel.run().await.unwrap();
    assert!(matches!(tunnel.run().await, Err(TunnelError::AlreadyStarted)));
    tunnel.stop();
}
