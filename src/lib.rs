//! Core of an ISO 8583 front-end processor.
//!
//! The crate mediates financial traffic between acquiring channels
//! (ATM, POS, mobile) and a central interbank switch over a dual-channel
//! link: requests leave on one TCP connection, responses arrive on an
//! independent second connection and are correlated back to their
//! originating request by trace number (field 11).
//!
//! The three layers:
//!
//! * `protocol`: the wire codec — length-prefixed framing, bitmap-driven
//!   field layout, table-driven per-field encoding.
//! * `conn`: the dual-channel client — [`SwitchLink`] composes a send
//!   handler, a receive handler and the pending-request registry, and runs
//!   the sign-on/heartbeat/reconnect protocol across the pair.
//! * `server`: the inbound counterpart — [`ChannelServer`] accepts
//!   channel sessions, decodes, and replies through an injected
//!   [`InboundHandler`].

#![deny(missing_debug_implementations)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

mod conn;
mod fep_error;
mod protocol;
mod server;

pub use crate::fep_error::{FepError, FepResult};

pub use crate::protocol::{
    field_table::{clear_provider, clear_providers, provider, register_provider, reload_provider},
    netmgmt, response_code, Bitmap, DataEncoding, DataType, FieldDefinition, FieldTable,
    LengthEncoding, LengthType, MaskedMessage, Message, MessageCodec, Mti,
};

pub use crate::conn::{
    ChannelState, FailurePolicy, LinkConfiguration, LinkParams, LinkParamsBuilder, LinkState,
    LinkStatistics, PendingRegistry, PendingResponse, RegistryStatistics, SwitchLink,
};

pub use crate::server::{
    build_response, ChannelServer, EchoHandler, InboundContext, InboundHandler, WorkflowGateway,
    WorkflowJob,
};

/// Name of the default field definition provider.
///
/// [`provider(DEFAULT_PROVIDER)`](crate::provider) resolves to the field
/// table of the interbank switch, loaded from the embedded definition file
/// unless overridden through the `FISCLINK_FIELD_TABLE_FISC` environment
/// key.
pub const DEFAULT_PROVIDER: &str = "FISC";

/// Modulus of the trace-number space (field 11 carries six digits).
pub const TRACE_MODULUS: u32 = 1_000_000;
