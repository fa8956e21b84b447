use crate::{
    protocol::{mti::response_code, Message},
    FepError, FepResult,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

// Fields echoed from request to response: PAN, processing code, amount,
// trace, terminal and merchant ids.
const ECHO_FIELDS: [u8; 6] = [2, 3, 4, 11, 41, 42];

/// Processes one inbound message. Implementations may respond inline or
/// hand the context to another task and respond later; a response that
/// misses the server's wall-clock bound is replaced by a default
/// "system malfunction" reply.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, ctx: InboundContext) -> FepResult<()>;
}

/// Everything a handler gets for one inbound message: the channel it
/// arrived on, the client it came from, the decoded message, and the
/// one-shot response path back into the session.
#[derive(Debug)]
pub struct InboundContext {
    channel_name: Arc<str>,
    client_id: String,
    message: Message,
    responder: Mutex<Option<oneshot::Sender<Message>>>,
}

impl InboundContext {
    pub(crate) fn new(
        channel_name: Arc<str>,
        client_id: String,
        message: Message,
        responder: oneshot::Sender<Message>,
    ) -> Self {
        Self {
            channel_name,
            client_id,
            message,
            responder: Mutex::new(Some(responder)),
        }
    }

    /// Name of the accepting channel ("ATM", "POS", ...).
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Peer identification of the session, currently its socket address.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The decoded inbound message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Sends the response for this message. Usable exactly once; a second
    /// call is a usage error.
    pub fn respond(&self, response: Message) -> FepResult<()> {
        let tx = self
            .responder
            .lock()?
            .take()
            .ok_or(FepError::Usage("response was already sent"))?;
        tx.send(response)
            .map_err(|_| FepError::ConnectionDown("session is gone".to_string()))
    }
}

/// Builds the response skeleton for `request`: response MTI (request +
/// 10), echo fields, local time/date from the server clock, the given
/// response code, and an echoed network-management code where present.
pub fn build_response(request: &Message, code: &str) -> FepResult<Message> {
    if !request.mti().is_request() {
        return Err(FepError::UsageDetailed(format!(
            "cannot respond to non-request mti {}",
            request.mti()
        )));
    }
    let mut response = Message::new(request.mti().response());
    for n in ECHO_FIELDS {
        if let Some(value) = request.get(n) {
            response.set(n, value)?;
        }
    }
    let now = time::OffsetDateTime::now_utc();
    response.set(
        12,
        now.format(&time::macros::format_description!(
            "[hour][minute][second]"
        ))
        .map_err(|e| FepError::UsageDetailed(format!("clock format: {e}")))?,
    )?;
    response.set(
        13,
        now.format(&time::macros::format_description!("[month][day]"))
            .map_err(|e| FepError::UsageDetailed(format!("clock format: {e}")))?,
    )?;
    response.set(Message::FIELD_RESPONSE_CODE, code)?;
    if let Some(netmgmt_code) = request.get(Message::FIELD_NETMGMT_CODE) {
        response.set(Message::FIELD_NETMGMT_CODE, netmgmt_code)?;
    }
    Ok(response)
}

/// Answers network-management traffic: sign-on, sign-off and echo tests
/// are approved, anything else is declined as an invalid transaction.
/// The workhorse behind switch simulators and the default peer of a
/// freshly deployed channel server.
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl InboundHandler for EchoHandler {
    async fn handle(&self, ctx: InboundContext) -> FepResult<()> {
        let request = ctx.message();
        let code = match request.get(Message::FIELD_NETMGMT_CODE) {
            Some(code) if request.mti().is_network_management() => code,
            _ => {
                ctx.respond(build_response(request, response_code::INVALID_TRANSACTION)?)?;
                return Ok(());
            }
        };
        use crate::protocol::mti::netmgmt;
        let reply_code = match code {
            netmgmt::SIGN_ON | netmgmt::SIGN_OFF | netmgmt::ECHO_TEST => response_code::APPROVED,
            _ => response_code::INVALID_TRANSACTION,
        };
        ctx.respond(build_response(request, reply_code)?)
    }
}

#[cfg(test)]
mod test {
    use super::build_response;
    use crate::{protocol::Message, Mti};
    use std::str::FromStr;

    #[test]
    fn test_echo_fields_and_codes() {
        let request = Message::new(Mti::from_str("0200").unwrap())
            .with(2, "4111111111111111")
            .with(3, "011000")
            .with(4, "000000010000")
            .with(11, "000002")
            .with(41, "ATM00001")
            .with(48, "not echoed");
        let response = build_response(&request, "00").unwrap();
        assert_eq!(response.mti().digits(), "0210");
        assert_eq!(response.get(2), Some("4111111111111111"));
        assert_eq!(response.get(11), Some("000002"));
        assert_eq!(response.get(41), Some("ATM00001"));
        assert_eq!(response.get(39), Some("00"));
        assert!(response.get(48).is_none());
        assert_eq!(response.get(12).map(str::len), Some(6));
        assert_eq!(response.get(13).map(str::len), Some(4));
    }

    #[test]
    fn test_non_request_rejected() {
        let response_msg = Message::new(Mti::from_str("0210").unwrap());
        assert!(build_response(&response_msg, "00").is_err());
    }
}
