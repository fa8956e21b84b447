// The inbound mirror of the dual link: accepts channel sessions (ATM,
// POS, mobile gateways), decodes their traffic, and replies through an
// injected handler.

mod channel_server;
mod handler;
mod session;
mod workflow;

pub use {
    channel_server::ChannelServer,
    handler::{build_response, EchoHandler, InboundContext, InboundHandler},
    workflow::{WorkflowGateway, WorkflowJob},
};

pub(crate) use session::SessionSettings;
