use crate::{FepError, FepResult};

/// The two channels of a dual link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelSide {
    /// Carries outbound requests; the peer never sends on it.
    Send,
    /// Carries inbound responses and peer-initiated traffic.
    Receive,
}

impl ChannelSide {
    pub fn name(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }
}

/// Lifecycle of a single channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    SignedOn,
    Reconnecting,
}

impl ChannelState {
    pub fn is_up(self) -> bool {
        matches!(self, Self::Connected | Self::SignedOn)
    }
}

/// Observable state of the channel pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    /// Only the send channel is up.
    SendOnly,
    /// Only the receive channel is up.
    ReceiveOnly,
    /// Both channels are up, sign-on not yet exchanged.
    BothConnected,
    /// Application-level session established.
    SignedOn,
    /// A previously signed-on link lost one side and is recovering.
    Degraded,
    /// The reconnection budget is exhausted; terminal until `close()`.
    Failed,
}

impl LinkState {
    pub(crate) fn from_channels(
        send: ChannelState,
        receive: ChannelState,
        signed_on: bool,
        was_signed_on: bool,
    ) -> Self {
        match (send.is_up(), receive.is_up()) {
            (true, true) if signed_on => Self::SignedOn,
            (true, true) => Self::BothConnected,
            (true, false) if was_signed_on => Self::Degraded,
            (false, true) if was_signed_on => Self::Degraded,
            (true, false) => Self::SendOnly,
            (false, true) => Self::ReceiveOnly,
            (false, false) => Self::Disconnected,
        }
    }

    /// True when the link accepts new requests at all.
    pub fn is_operational(self) -> bool {
        matches!(
            self,
            Self::SendOnly | Self::ReceiveOnly | Self::BothConnected | Self::SignedOn | Self::Degraded
        )
    }
}

/// Determines how the supervisor treats new and pending requests when
/// one of the two channels is down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Strict: either channel down rejects new requests and cancels all
    /// pending ones.
    #[default]
    FailWhenEitherDown,
    /// Lenient: pending requests survive as long as the receive channel
    /// (the response path) stays alive; new requests still need a live
    /// send channel.
    FailWhenBothDown,
    /// Admission-only: both channels must be up to submit; pending
    /// requests are kept while the receive channel lives.
    RequireBothForSend,
}

impl FailurePolicy {
    /// May a new request be admitted given the channel states?
    pub(crate) fn admits(self, send: ChannelState, receive: ChannelState) -> bool {
        match self {
            Self::FailWhenEitherDown | Self::RequireBothForSend => {
                send.is_up() && receive.is_up()
            }
            Self::FailWhenBothDown => send.is_up(),
        }
    }

    /// Must pending requests be cancelled when `lost` went down?
    pub(crate) fn cancels_pending_on(self, lost: ChannelSide) -> bool {
        match self {
            Self::FailWhenEitherDown => true,
            // responses can still arrive while the receive side lives
            Self::FailWhenBothDown | Self::RequireBothForSend => lost == ChannelSide::Receive,
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = FepError;

    fn from_str(s: &str) -> FepResult<Self> {
        match s {
            "FAIL_WHEN_EITHER_DOWN" => Ok(Self::FailWhenEitherDown),
            "FAIL_WHEN_BOTH_DOWN" => Ok(Self::FailWhenBothDown),
            "REQUIRE_BOTH_FOR_SEND" => Ok(Self::RequireBothForSend),
            _ => Err(FepError::UsageDetailed(format!(
                "unknown failure policy {s:?}"
            ))),
        }
    }
}

// Raised by the handlers and consumed by the supervisor's event loop.
// The generation identifies which incarnation of the channel raised the
// event, so a report from an already-replaced handler cannot tear down
// its successor.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    ChannelDown {
        side: ChannelSide,
        generation: u64,
        reason: String,
    },
    ReadStale {
        side: ChannelSide,
    },
}

#[cfg(test)]
mod test {
    use super::{ChannelSide, ChannelState, FailurePolicy, LinkState};
    use std::str::FromStr;

    #[test]
    fn test_pair_state() {
        use ChannelState::{Connected, Disconnected};
        assert_eq!(
            LinkState::from_channels(Connected, Connected, false, false),
            LinkState::BothConnected
        );
        assert_eq!(
            LinkState::from_channels(Connected, Connected, true, true),
            LinkState::SignedOn
        );
        assert_eq!(
            LinkState::from_channels(Connected, Disconnected, false, false),
            LinkState::SendOnly
        );
        assert_eq!(
            LinkState::from_channels(Connected, Disconnected, false, true),
            LinkState::Degraded
        );
        assert_eq!(
            LinkState::from_channels(Disconnected, Disconnected, false, true),
            LinkState::Disconnected
        );
    }

    #[test]
    fn test_policy_admission() {
        use ChannelState::{Connected, Disconnected};
        assert!(!FailurePolicy::FailWhenEitherDown.admits(Connected, Disconnected));
        assert!(FailurePolicy::FailWhenBothDown.admits(Connected, Disconnected));
        assert!(!FailurePolicy::FailWhenBothDown.admits(Disconnected, Connected));
        assert!(!FailurePolicy::RequireBothForSend.admits(Connected, Disconnected));
    }

    #[test]
    fn test_policy_cancellation() {
        assert!(FailurePolicy::FailWhenEitherDown.cancels_pending_on(ChannelSide::Send));
        assert!(!FailurePolicy::FailWhenBothDown.cancels_pending_on(ChannelSide::Send));
        assert!(FailurePolicy::FailWhenBothDown.cancels_pending_on(ChannelSide::Receive));
        assert!(!FailurePolicy::RequireBothForSend.cancels_pending_on(ChannelSide::Send));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            FailurePolicy::from_str("FAIL_WHEN_BOTH_DOWN").unwrap(),
            FailurePolicy::FailWhenBothDown
        );
        assert!(FailurePolicy::from_str("whatever").is_err());
    }
}
