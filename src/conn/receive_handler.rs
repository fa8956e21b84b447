use crate::{
    conn::{ChannelSide, LinkEvent, LinkStatistics, PendingRegistry},
    protocol::{Message, MessageCodec},
    FepError,
};
use debug_ignore::DebugIgnore;
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::{net::tcp::OwnedReadHalf, sync::mpsc};

// Called for every received message that matches no pending request:
// late responses and peer-initiated traffic such as echo probes.
pub(crate) type UnsolicitedHandler = Arc<dyn Fn(&str, Message) + Send + Sync>;

// Owns the receive channel: a background task that frame-reads, decodes,
// and correlates against the registry. The handler never writes; the
// send path lives on the other connection. The write half is parked here
// unused so the socket is not half-closed while responses flow.
#[derive(Debug)]
pub(crate) struct ReceiveHandler {
    task: tokio::task::JoinHandle<()>,
    _write_half: tokio::net::tcp::OwnedWriteHalf,
}

pub(crate) struct ReceiveLoop {
    pub(crate) channel_name: &'static str,
    pub(crate) codec: MessageCodec,
    pub(crate) registry: PendingRegistry,
    pub(crate) stats: Arc<LinkStatistics>,
    pub(crate) events: mpsc::Sender<LinkEvent>,
    pub(crate) unsolicited: DebugIgnore<UnsolicitedHandler>,
    pub(crate) read_timeout: Duration,
    pub(crate) generation: u64,
}

impl ReceiveHandler {
    pub(crate) fn spawn(
        read_half: OwnedReadHalf,
        write_half: tokio::net::tcp::OwnedWriteHalf,
        receive_loop: ReceiveLoop,
    ) -> Self {
        Self {
            task: tokio::spawn(receive_loop.run(read_half)),
            _write_half: write_half,
        }
    }

    pub(crate) fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for ReceiveHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ReceiveLoop {
    async fn run(self, mut read_half: OwnedReadHalf) {
        // Staleness is observed by a watchdog instead of cancelling the
        // read: aborting a read mid-frame would lose the consumed bytes
        // and desynchronize the framing.
        let last_read = Arc::new(Mutex::new(Instant::now()));
        let watchdog = tokio::spawn(idle_watchdog(
            Arc::clone(&last_read),
            self.read_timeout,
            self.events.clone(),
        ));
        loop {
            let frame = match self.codec.read_frame(&mut read_half).await {
                Ok(frame) => frame,
                Err(e) => {
                    self.report_down(&e).await;
                    break;
                }
            };
            if let Ok(mut last) = last_read.lock() {
                *last = Instant::now();
            }
            match self.codec.decode(&frame) {
                Ok(message) => self.dispatch(message),
                Err(e @ FepError::Field { .. }) => {
                    // one bad field poisons one message, not the channel
                    warn!("dropping undecodable message: {e}");
                }
                Err(e) => {
                    self.report_down(&e).await;
                    break;
                }
            }
        }
        watchdog.abort();
    }

    fn dispatch(&self, message: Message) {
        self.stats.add_received();
        let unmatched = match message.trace().map(ToString::to_string) {
            Some(trace) => match self.registry.try_complete(&trace, message) {
                Ok(()) => {
                    self.stats.add_matched();
                    None
                }
                Err(message) => Some(message),
            },
            None => Some(message),
        };
        if let Some(message) = unmatched {
            debug!("unsolicited message on {}: {message:?}", self.channel_name);
            self.stats.add_unsolicited();
            (self.unsolicited.0)(self.channel_name, message);
        }
    }

    async fn report_down(&self, error: &FepError) {
        let _ = self
            .events
            .send(LinkEvent::ChannelDown {
                side: ChannelSide::Receive,
                generation: self.generation,
                reason: error.to_string(),
            })
            .await;
    }
}

async fn idle_watchdog(
    last_read: Arc<Mutex<Instant>>,
    read_timeout: Duration,
    events: mpsc::Sender<LinkEvent>,
) {
    let period = (read_timeout / 2).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let idle = last_read
            .lock()
            .map_or(Duration::ZERO, |last| last.elapsed());
        if idle >= read_timeout {
            warn!("receive channel stale: no traffic for {idle:?}");
            let _ = events
                .send(LinkEvent::ReadStale {
                    side: ChannelSide::Receive,
                })
                .await;
        }
    }
}
