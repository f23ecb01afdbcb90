use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::{api::Api, Client};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::debug;

/// Byte pipe to a port inside a pod.
pub trait ForwardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ForwardStream for T {}

/// One forwarded connection: the byte stream plus the transport carrying it.
pub struct Upstream {
    pub stream: Box<dyn ForwardStream>,
    /// Receives the transport's error if it fails; dropped on a clean close.
    pub failed: oneshot::Receiver<anyhow::Error>,
}

impl Upstream {
    /// A stream whose failures show up on the stream itself.
    pub fn direct(stream: impl ForwardStream + 'static) -> Self {
        let (_tx, failed) = oneshot::channel();
        Self { stream: Box::new(stream), failed }
    }
}

/// Opens one upstream connection per accepted local connection.
#[async_trait::async_trait]
pub trait PodForwarder: Send + Sync {
    async fn connect(&self, namespace: &str, pod: &str, port: u16) -> Result<Upstream>;
}

/// Forwards through the API server's `pods/portforward` subresource.
pub struct KubeForwarder {
    client: Client,
}

impl KubeForwarder {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl PodForwarder for KubeForwarder {
    async fn connect(&self, namespace: &str, pod: &str, port: u16) -> Result<Upstream> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut pf = api
            .portforward(pod, &[port])
            .await
            .with_context(|| format!("could not forward port {} of pod {}/{}", port, namespace, pod))?;
        let stream = pf.take_stream(port).ok_or_else(|| anyhow!("pf stream missing"))?;
        let (tx, failed) = oneshot::channel();
        // the forwarder drives the websocket until the stream closes
        let pod = pod.to_string();
        tokio::spawn(async move {
            match pf.join().await {
                Ok(()) => debug!(pod = %pod, "port forward stream closed"),
                Err(e) => { let _ = tx.send(anyhow!(e).context(format!("port forward to pod {} broke", pod))); }
            }
        });
        Ok(Upstream { stream: Box::new(stream), failed })
    }
}
