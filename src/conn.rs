// The dual-channel link to the switch: parameters and configuration,
// pending-request registry, the two channel handlers, and the supervisor
// that composes them.

mod link_configuration;
mod link_params;
mod link_params_builder;
mod link_state;
mod link_statistics;
mod pending_registry;
mod receive_handler;
mod send_handler;
mod supervisor;
mod tcp_client;
mod trace_source;

pub use {
    link_configuration::LinkConfiguration,
    link_params::LinkParams,
    link_params_builder::LinkParamsBuilder,
    link_state::{ChannelSide, ChannelState, FailurePolicy, LinkState},
    link_statistics::LinkStatistics,
    pending_registry::{PendingRegistry, PendingResponse, RegistryStatistics},
    supervisor::SwitchLink,
};

pub(crate) use {
    link_state::LinkEvent, pending_registry::CancelReason, receive_handler::ReceiveHandler,
    receive_handler::UnsolicitedHandler, send_handler::SendHandler, trace_source::TraceSource,
};
