use crate::relay::dispatcher::Dispatcher;
use crate::relay::metrics;
use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Largest datagram the receive buffer accepts.
pub const MAX_DATAGRAM: usize = 64 * 1024;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// UDP shell around the [`Dispatcher`]. One socket serves both directions: client queries and
/// replies, and the relayed traffic to and from the upstream resolver.
pub struct RelayServer {
    dispatcher: Arc<Dispatcher>,
    listen: SocketAddr,
    metrics_addr: Option<SocketAddr>,
}

impl RelayServer {
    pub fn new(dispatcher: Dispatcher, listen: SocketAddr) -> Self {
        Self { dispatcher: Arc::new(dispatcher), listen, metrics_addr: None }
    }

    pub fn with_metrics(mut self, addr: Option<SocketAddr>) -> Self {
        self.metrics_addr = addr;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Binds the listen address and serves until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let socket = UdpSocket::bind(self.listen)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind UDP {}: {}", self.listen, e))?;
        tracing::info!(
            "Relay bound to UDP {}, forwarding to {}",
            self.listen,
            self.dispatcher.upstream()
        );
        self.serve(socket, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serves on an already bound socket until `shutdown` completes.
    pub async fn serve<F>(&self, socket: UdpSocket, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = self.dispatcher.clone();
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                dispatcher.sweep_expired();
            }
        });
        let metrics_task = self.metrics_addr.map(|addr| tokio::spawn(metrics::serve(addr)));

        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, {} relayed quer(ies) still pending", self.dispatcher.in_flight());
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((size, src)) => self.process(&socket, &buf[..size], src).await,
                    // ICMP errors from earlier sends surface here on some platforms.
                    Err(e) => tracing::warn!("UDP receive failed: {}", e),
                },
            }
        }

        sweeper.abort();
        if let Some(task) = metrics_task {
            task.abort();
        }
        Ok(())
    }

    async fn process(&self, socket: &UdpSocket, packet: &[u8], src: SocketAddr) {
        // Dropped packets are logged by the dispatcher.
        let Ok(dispatch) = self.dispatcher.handle_packet(packet, src) else {
            return;
        };
        let out = dispatch.outbound;
        if let Err(e) = socket.send_to(&out.bytes, out.to).await {
            tracing::warn!("Failed to send {} byte(s) to {}: {}", out.bytes.len(), out.to, e);
        }
    }
}
