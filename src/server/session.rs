use crate::{
    protocol::{mti::response_code, Message, MessageCodec},
    server::handler::{build_response, InboundContext, InboundHandler},
    FepError,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{oneshot, Mutex},
};

// Shared per-server settings handed to every session.
pub(crate) struct SessionSettings {
    pub(crate) channel_name: Arc<str>,
    pub(crate) codec: MessageCodec,
    pub(crate) handler: Arc<dyn InboundHandler>,
    pub(crate) response_deadline: Duration,
}

// MTI classes this server routes to the handler; anything else that is
// still a request gets an immediate "invalid transaction" reply.
const HANDLED_REQUESTS: [u16; 4] = [100, 200, 400, 800];

fn required_fields(mti: u16) -> &'static [u8] {
    match mti {
        100 => &[2, 3, 11, 41],
        200 => &[2, 3, 4, 11, 41],
        400 => &[4, 11],
        800 => &[11, 70],
        _ => &[11],
    }
}

// One accepted channel connection: frame-read, decode, dispatch, reply.
// Replies are written whole under a shared writer lock, so concurrently
// completing handlers never interleave frames.
pub(crate) async fn run_session(
    stream: TcpStream,
    client_id: String,
    settings: Arc<SessionSettings>,
) {
    debug!(
        "session {client_id} opened on channel {}",
        settings.channel_name
    );
    let (mut read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    loop {
        let frame = match settings.codec.read_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(FepError::Io { source }) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("session {client_id} closed by peer");
                break;
            }
            Err(e) => {
                warn!("session {client_id}: closing after framing error: {e}");
                break;
            }
        };
        match settings.codec.decode(&frame) {
            Ok(message) => dispatch(message, &client_id, &settings, &writer),
            Err(e @ FepError::Field { .. }) => {
                // bad field: drop the message, keep the session
                warn!("session {client_id}: dropping undecodable message: {e}");
            }
            Err(e) => {
                // framing is compromised: close without a reply
                warn!("session {client_id}: closing after protocol error: {e}");
                break;
            }
        }
    }
}

fn dispatch(
    message: Message,
    client_id: &str,
    settings: &Arc<SessionSettings>,
    writer: &Arc<Mutex<OwnedWriteHalf>>,
) {
    let mti = message.mti();
    if !mti.is_request() {
        warn!("session {client_id}: dropping non-request mti {mti}");
        return;
    }
    if message.trace().is_none() {
        warn!("session {client_id}: dropping mti {mti} without a trace number");
        return;
    }
    if !HANDLED_REQUESTS.contains(&mti.as_u16()) {
        debug!("session {client_id}: unknown mti {mti}, replying invalid transaction");
        reply_immediately(&message, response_code::INVALID_TRANSACTION, settings, writer);
        return;
    }
    let missing: Vec<u8> = required_fields(mti.as_u16())
        .iter()
        .copied()
        .filter(|&n| !message.contains(n))
        .collect();
    if !missing.is_empty() {
        // decode-time enforcement: absent mandatory fields are an error
        // reply, never synthesized defaults
        warn!("session {client_id}: mti {mti} is missing fields {missing:?}");
        reply_immediately(&message, response_code::INVALID_TRANSACTION, settings, writer);
        return;
    }

    let (response_tx, response_rx) = oneshot::channel();
    let ctx = InboundContext::new(
        Arc::clone(&settings.channel_name),
        client_id.to_string(),
        message.clone(),
        response_tx,
    );
    let settings = Arc::clone(settings);
    let writer = Arc::clone(writer);
    let client_id = client_id.to_string();
    tokio::spawn(async move {
        let outcome = tokio::time::timeout(settings.response_deadline, async {
            match settings.handler.handle(ctx).await {
                Ok(()) => response_rx.await.ok(),
                Err(e) => {
                    warn!("session {client_id}: handler failed for mti {}: {e}", message.mti());
                    None
                }
            }
        })
        .await;
        let response = match outcome {
            Ok(Some(response)) => Some(response),
            Ok(None) => default_reply(&message, &client_id),
            Err(_elapsed) => {
                warn!(
                    "session {client_id}: no response for trace {:?} within {:?}",
                    message.trace(),
                    settings.response_deadline
                );
                default_reply(&message, &client_id)
            }
        };
        let Some(response) = response else { return };
        let mut writer = writer.lock().await;
        if let Err(e) = settings.codec.write_message(&mut *writer, &response).await {
            warn!("session {client_id}: failed to write response: {e}");
        }
    });
}

fn default_reply(request: &Message, client_id: &str) -> Option<Message> {
    match build_response(request, response_code::SYSTEM_MALFUNCTION) {
        Ok(response) => Some(response),
        Err(e) => {
            warn!("session {client_id}: cannot build default reply: {e}");
            None
        }
    }
}

fn reply_immediately(
    request: &Message,
    code: &str,
    settings: &Arc<SessionSettings>,
    writer: &Arc<Mutex<OwnedWriteHalf>>,
) {
    let response = match build_response(request, code) {
        Ok(response) => response,
        Err(e) => {
            warn!("cannot build reply: {e}");
            return;
        }
    };
    let settings = Arc::clone(settings);
    let writer = Arc::clone(writer);
    tokio::spawn(async move {
        let mut writer = writer.lock().await;
        if let Err(e) = settings.codec.write_message(&mut *writer, &response).await {
            warn!("failed to write immediate reply: {e}");
        }
    });
}

#[cfg(test)]
mod test {
    use super::required_fields;

    #[test]
    fn test_required_fields() {
        assert_eq!(required_fields(200), &[2, 3, 4, 11, 41]);
        assert_eq!(required_fields(400), &[4, 11]);
        assert_eq!(required_fields(800), &[11, 70]);
    }
}
