//! Yard ops: tunnels from a local TCP port to a port of a cluster pod.

#![forbid(unsafe_code)]

use yard_core::StoreError;

mod forwarder;
mod tunnel;

pub use forwarder::{ForwardStream, KubeForwarder, PodForwarder, Upstream};
pub use tunnel::{ephemeral_port, Tunnel, TunnelManager, TunnelState};

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("no running pods found (matchLabels: {selector}, namespace: {namespace})")]
    NoRunningPod { selector: String, namespace: String },
    #[error("could not list pods in namespace {namespace}: {source}")]
    List { namespace: String, source: StoreError },
    #[error("could not get ephemeral port: {0}")]
    EphemeralPort(String),
    #[error("could not listen on port {port}: {message}")]
    Bind { port: u16, message: String },
    #[error("port forward failed: {0}")]
    Forward(String),
    #[error("port forward task failed: {0}")]
    TaskFailed(String),
    #[error("tunnel already started")]
    AlreadyStarted,
    #[error("tunnel stopped")]
    Stopped,
}

impl TunnelError {
    pub fn is_not_found(&self) -> bool { matches!(self, TunnelError::NoRunningPod { .. }) }
}
