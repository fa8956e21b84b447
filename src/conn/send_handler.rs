use crate::{
    conn::{ChannelSide, LinkEvent, LinkStatistics},
    protocol::{Message, MessageCodec},
    FepResult,
};
use std::{
    sync::{Arc, Mutex},
    time::Instant,
};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
};

// Owns the send channel. Writes are serialized through one async mutex,
// so frames leave in submission order; the read direction of this
// connection is protocol-silent and only drained.
#[derive(Debug)]
pub(crate) struct SendHandler {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    codec: MessageCodec,
    stats: Arc<LinkStatistics>,
    last_write: Mutex<Instant>,
    drain: tokio::task::JoinHandle<()>,
}

impl SendHandler {
    pub(crate) fn new(
        stream: TcpStream,
        codec: MessageCodec,
        stats: Arc<LinkStatistics>,
        events: mpsc::Sender<LinkEvent>,
        generation: u64,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let drain = tokio::spawn(drain_inbound(read_half, events, generation));
        Self {
            writer: tokio::sync::Mutex::new(write_half),
            codec,
            stats,
            last_write: Mutex::new(Instant::now()),
            drain,
        }
    }

    // Encodes and writes one message. Frames are written whole under the
    // writer lock, never interleaved.
    pub(crate) async fn write(&self, message: &Message) -> FepResult<()> {
        let frame = self.codec.encode(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        drop(writer);
        if let Ok(mut last_write) = self.last_write.lock() {
            *last_write = Instant::now();
        }
        self.stats.add_sent();
        trace!("sent mti {} ({} bytes)", message.mti(), frame.len());
        Ok(())
    }

    // How long the channel has been write-idle; feeds the heartbeat
    // scheduler.
    pub(crate) fn write_idle(&self) -> std::time::Duration {
        self.last_write
            .lock()
            .map_or(std::time::Duration::ZERO, |last| last.elapsed())
    }

    pub(crate) async fn shutdown(&self) {
        self.drain.abort();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for SendHandler {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

// The peer must not send on the send connection in dual-channel mode;
// anything that arrives is logged and discarded. EOF here means the
// channel died.
async fn drain_inbound(
    mut read_half: OwnedReadHalf,
    events: mpsc::Sender<LinkEvent>,
    generation: u64,
) {
    use tokio::io::AsyncReadExt;
    let mut sink = [0_u8; 512];
    loop {
        match read_half.read(&mut sink).await {
            Ok(0) => {
                let _ = events
                    .send(LinkEvent::ChannelDown {
                        side: ChannelSide::Send,
                        generation,
                        reason: "peer closed the send connection".to_string(),
                    })
                    .await;
                break;
            }
            Ok(n) => {
                warn!("discarding {n} unexpected inbound bytes on the send channel");
            }
            Err(e) => {
                let _ = events
                    .send(LinkEvent::ChannelDown {
                        side: ChannelSide::Send,
                        generation,
                        reason: format!("send connection read failed: {e}"),
                    })
                    .await;
                break;
            }
        }
    }
}
