use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use metrics::counter;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use yard_kubehub::{pod_gvk, pod_phase, selector_string, ObjectStore};

use crate::forwarder::{PodForwarder, Upstream};
use crate::TunnelError;

const BIND_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Created,
    Running,
    Stopped,
}

/// Binds an OS-assigned port, reads it back and releases it. Someone else
/// may grab the port before the tunnel binds it again.
pub async fn ephemeral_port(bind: &str) -> Result<u16, TunnelError> {
    let listener = TcpListener::bind((bind, 0)).await.map_err(|e| TunnelError::EphemeralPort(e.to_string()))?;
    let port = listener.local_addr().map_err(|e| TunnelError::EphemeralPort(e.to_string()))?.port();
    drop(listener);
    Ok(port)
}

/// Resolves pods and hands out tunnels to them.
pub struct TunnelManager {
    store: Arc<dyn ObjectStore>,
    forwarder: Arc<dyn PodForwarder>,
    bind_address: String,
}

impl TunnelManager {
    pub fn new(store: Arc<dyn ObjectStore>, forwarder: Arc<dyn PodForwarder>) -> Self {
        let bind_address = std::env::var("YARD_PF_BIND").unwrap_or_else(|_| "127.0.0.1".to_string());
        Self { store, forwarder, bind_address }
    }

    pub fn with_bind_address(mut self, bind: impl Into<String>) -> Self { self.bind_address = bind.into(); self }

    /// Picks the first Running pod matching `selector`, in list order. A
    /// `local_port` of 0 allocates an ephemeral port.
    pub async fn create(
        &self,
        selector: &BTreeMap<String, String>,
        namespace: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Tunnel, TunnelError> {
        let pods = self
            .store
            .list(&pod_gvk(), Some(namespace), selector)
            .await
            .map_err(|source| TunnelError::List { namespace: namespace.to_string(), source })?;
        let pod = pods
            .iter()
            .find(|p| pod_phase(p) == Some("Running"))
            .ok_or_else(|| TunnelError::NoRunningPod { selector: selector_string(selector), namespace: namespace.to_string() })?
            .name()
            .to_string();

        let ephemeral = local_port == 0;
        let local_port = if ephemeral { ephemeral_port(&self.bind_address).await? } else { local_port };
        debug!(pod = %pod, namespace, local_port, remote_port, "tunnel created");

        Ok(Tunnel {
            namespace: namespace.to_string(),
            pod,
            remote_port,
            bind: self.bind_address.clone(),
            ephemeral,
            local_port: AtomicU16::new(local_port),
            forwarder: self.forwarder.clone(),
            stop: CancellationToken::new(),
            started: Mutex::new(false),
            task: Mutex::new(None),
        })
    }
}

/// A local port mapped onto one pod port. Bound to the pod chosen at
/// creation; it never moves to another pod.
pub struct Tunnel {
    namespace: String,
    pod: String,
    remote_port: u16,
    bind: String,
    ephemeral: bool,
    local_port: AtomicU16,
    forwarder: Arc<dyn PodForwarder>,
    stop: CancellationToken,
    started: Mutex<bool>,
    task: Mutex<Option<JoinHandle<Result<(), TunnelError>>>>,
}

impl Tunnel {
    pub fn pod_name(&self) -> &str { &self.pod }

    pub fn namespace(&self) -> &str { &self.namespace }

    pub fn local_port(&self) -> u16 { self.local_port.load(Ordering::SeqCst) }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.bind, self.local_port(), path)
    }

    pub fn state(&self) -> TunnelState {
        if self.stop.is_cancelled() { return TunnelState::Stopped; }
        match self.started.lock() {
            Ok(started) if *started => TunnelState::Running,
            _ => TunnelState::Created,
        }
    }

    /// Starts forwarding in the background and returns once the local port
    /// accepts connections, or with the error that kept it from starting.
    pub async fn run(&self) -> Result<(), TunnelError> {
        {
            let mut started = self.started.lock().map_err(|_| TunnelError::TaskFailed("state lock poisoned".into()))?;
            if *started { return Err(TunnelError::AlreadyStarted); }
            *started = true;
        }
        if self.stop.is_cancelled() { return Err(TunnelError::Stopped); }

        let (ready_tx, ready_rx) = oneshot::channel::<u16>();
        let forward = ForwardLoop {
            namespace: self.namespace.clone(),
            pod: self.pod.clone(),
            remote_port: self.remote_port,
            bind: self.bind.clone(),
            ephemeral: self.ephemeral,
            local_port: self.local_port(),
            forwarder: self.forwarder.clone(),
            stop: self.stop.clone(),
        };
        let handle = tokio::spawn(forward.run(ready_tx));

        match ready_rx.await {
            Ok(port) => {
                self.local_port.store(port, Ordering::SeqCst);
                if let Ok(mut task) = self.task.lock() { *task = Some(handle); }
                info!(pod = %self.pod, url = %self.url(""), "port forward initialized successfully");
                Ok(())
            }
            // ready sender dropped: the task ended before binding
            Err(_) => match handle.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(TunnelError::Stopped),
                Err(e) => Err(TunnelError::TaskFailed(e.to_string())),
            },
        }
    }

    /// Idempotent; safe before, during and after `run`.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() { debug!(pod = %self.pod, "stopping tunnel"); }
        self.stop.cancel();
    }

    /// Resolves once the tunnel stopped, by `stop` or by the forwarding task
    /// ending on its own. Returns that task's terminal error, if any, to the
    /// first caller.
    pub async fn wait_for_stop(&self) -> Result<(), TunnelError> {
        self.stop.cancelled().await;
        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        match handle {
            Some(h) => h.await.map_err(|e| TunnelError::TaskFailed(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// Token cancelled when the tunnel stops; for wiring into signal handlers.
    pub fn stop_token(&self) -> CancellationToken { self.stop.clone() }
}

impl Drop for Tunnel {
    fn drop(&mut self) { self.stop.cancel(); }
}

struct ForwardLoop {
    namespace: String,
    pod: String,
    remote_port: u16,
    bind: String,
    ephemeral: bool,
    local_port: u16,
    forwarder: Arc<dyn PodForwarder>,
    stop: CancellationToken,
}

impl ForwardLoop {
    async fn run(self, ready: oneshot::Sender<u16>) -> Result<(), TunnelError> {
        // whatever ends this task also stops the tunnel
        let _guard = self.stop.clone().drop_guard();

        // the pod must be reachable before the tunnel reports ready
        let dial = tokio::select! {
            _ = self.stop.cancelled() => return Ok(()),
            d = self.forwarder.connect(&self.namespace, &self.pod, self.remote_port) => d,
        };
        drop(dial.map_err(|e| TunnelError::Forward(format!("{:#}", e)))?);

        let listener = tokio::select! {
            _ = self.stop.cancelled() => return Ok(()),
            l = self.bind_listener() => l?,
        };
        let port = listener.local_addr().map_err(|e| TunnelError::Bind { port: self.local_port, message: e.to_string() })?.port();
        let _ = ready.send(port);

        let (failures_tx, mut failures) = mpsc::channel::<String>(1);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!(pod = %self.pod, "forwarding loop stopped");
                    return Ok(());
                }
                Some(message) = failures.recv() => {
                    warn!(pod = %self.pod, error = %message, "port forward lost, stopping tunnel");
                    return Err(TunnelError::Forward(message));
                }
                accepted = listener.accept() => match accepted {
                    Ok((inbound, peer)) => {
                        debug!(peer = %peer, pod = %self.pod, "connection accepted");
                        counter!("tunnel_connections", 1u64);
                        self.spawn_connection(inbound, failures_tx.clone());
                    }
                    Err(e) => return Err(TunnelError::Forward(format!("accept error: {}", e))),
                },
            }
        }
    }

    async fn bind_listener(&self) -> Result<TcpListener, TunnelError> {
        let mut port = self.local_port;
        let mut attempt = 1;
        loop {
            match TcpListener::bind((self.bind.as_str(), port)).await {
                Ok(l) => return Ok(l),
                Err(e) if self.ephemeral && e.kind() == ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                    warn!(port, attempt, "ephemeral port taken, picking another");
                    port = ephemeral_port(&self.bind).await?;
                    attempt += 1;
                }
                Err(e) => return Err(TunnelError::Bind { port, message: e.to_string() }),
            }
        }
    }

    /// Upstream dial and transport errors end the whole tunnel; errors on
    /// the local side only close this connection.
    fn spawn_connection(&self, mut inbound: tokio::net::TcpStream, failures: mpsc::Sender<String>) {
        let forwarder = self.forwarder.clone();
        let (ns, pod, port) = (self.namespace.clone(), self.pod.clone(), self.remote_port);
        let stop = self.stop.clone();
        tokio::spawn(async move {
            let Upstream { mut stream, mut failed } = match forwarder.connect(&ns, &pod, port).await {
                Ok(u) => u,
                Err(e) => {
                    counter!("tunnel_connection_errors", 1u64);
                    let _ = failures.try_send(format!("{:#}", e));
                    return;
                }
            };
            tokio::select! {
                _ = stop.cancelled() => {}
                Ok(e) = &mut failed => {
                    counter!("tunnel_connection_errors", 1u64);
                    let _ = failures.try_send(format!("{:#}", e));
                }
                res = tokio::io::copy_bidirectional(&mut inbound, &mut stream) => {
                    if let Err(e) = res { debug!(pod = %pod, error = %e, "forwarded connection closed with error"); }
                }
            }
        });
    }
}
