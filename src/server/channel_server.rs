use crate::{
    protocol::MessageCodec,
    server::{handler::InboundHandler, session, SessionSettings},
    FepResult,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};

/// Accepts inbound channel sessions and routes their messages through an
/// injected [`InboundHandler`].
///
/// Unlike the dual link to the switch, channel sessions are single
/// connections: requests and responses share the stream. Each accepted
/// connection runs its own session task; replies that miss the response
/// deadline are answered with a default "system malfunction".
#[derive(Debug)]
pub struct ChannelServer {
    channel_name: Arc<str>,
    local_addr: SocketAddr,
    accept_task: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChannelServer {
    /// Default wall-clock bound for a handler to produce its response.
    pub const DEFAULT_RESPONSE_DEADLINE: Duration = Duration::from_secs(3);

    /// Binds and starts accepting with the default response deadline.
    pub async fn bind(
        channel_name: impl Into<String>,
        addr: &str,
        codec: MessageCodec,
        handler: Arc<dyn InboundHandler>,
    ) -> FepResult<Self> {
        Self::bind_with_deadline(
            channel_name,
            addr,
            codec,
            handler,
            Self::DEFAULT_RESPONSE_DEADLINE,
        )
        .await
    }

    /// Binds and starts accepting; handlers get `response_deadline` of
    /// wall-clock time per message before the default reply is sent.
    pub async fn bind_with_deadline(
        channel_name: impl Into<String>,
        addr: &str,
        codec: MessageCodec,
        handler: Arc<dyn InboundHandler>,
        response_deadline: Duration,
    ) -> FepResult<Self> {
        let channel_name: Arc<str> = Arc::from(channel_name.into());
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("channel server {channel_name} listening on {local_addr}");

        let settings = Arc::new(SessionSettings {
            channel_name: Arc::clone(&channel_name),
            codec,
            handler,
            response_deadline,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, settings, shutdown_rx));
        Ok(Self {
            channel_name,
            local_addr,
            accept_task,
            shutdown_tx,
        })
    }

    /// The accepting channel's name.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// The bound address; with port 0 this is where the listener actually
    /// ended up.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new sessions. Already-running sessions finish
    /// their current exchanges and end when their peers disconnect.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    settings: Arc<SessionSettings>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("channel server {} stopping", settings.channel_name);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!("set_nodelay failed for {peer}: {e}");
                    }
                    tokio::spawn(session::run_session(
                        stream,
                        peer.to_string(),
                        Arc::clone(&settings),
                    ));
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}
