use thiserror::Error;

/// A list specifying categories of [`FepError`](crate::FepError).
///
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FepError {
    /// A malformed frame, a bitmap/body length mismatch, or a set field
    /// without a definition. Fatal to the current connection.
    #[error("Protocol violation: {}", _0)]
    Protocol(String),

    /// A specific field failed validation, encode, or decode.
    /// Fatal to the current message only.
    #[error("Field {field}: {reason}")]
    Field {
        /// Field number 2..=128.
        field: u8,
        reason: String,
    },

    /// A field definition source could not be parsed.
    #[error("Field definition source, line {line}: {reason}")]
    Definition { line: usize, reason: String },

    /// A registered request exceeded its deadline. A late response for
    /// the same trace is treated as unsolicited.
    #[error("Request timed out before a response arrived")]
    Timeout,

    /// The request cannot proceed because the link is down per the
    /// configured failure policy.
    #[error("Connection down: {}", _0)]
    ConnectionDown(String),

    /// The in-flight window is exhausted; retry after backoff.
    #[error("In-flight window exhausted")]
    Overloaded,

    /// The trace key is already registered. Indicates a caller bug in
    /// trace generation.
    #[error("Trace {} is already registered", _0)]
    DuplicateTrace(String),

    /// The request was cancelled before completion.
    #[error("Request cancelled: {}", _0)]
    Cancelled(String),

    /// The link is closing; returned to all pending requests.
    #[error("Link is shutting down")]
    Shutdown,

    /// The switch answered a management exchange with a non-approval
    /// response code (field 39).
    #[error("Switch responded with code {code}")]
    Switch { code: String },

    /// Error occured in communication with the peer.
    #[error(transparent)]
    Io {
        /// The causing Error.
        #[from]
        source: std::io::Error,
    },

    /// Error occured in thread synchronization.
    #[error("Error occured in thread synchronization")]
    Poison,

    /// Error caused by wrong usage.
    #[error("Wrong usage: {}", _0)]
    Usage(&'static str),

    /// Error caused by wrong usage.
    #[error("Wrong usage: {}", _0)]
    UsageDetailed(String),
}

/// Abbreviation of `Result<T, FepError>`.
pub type FepResult<T> = std::result::Result<T, FepError>;

impl FepError {
    pub(crate) fn field(field: u8, reason: impl Into<String>) -> Self {
        Self::Field {
            field,
            reason: reason.into(),
        }
    }

    /// True if the error compromises the framing of its connection, so
    /// that the connection must be replaced rather than reused.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Io { .. })
    }

    /// Returns the response code reported by the switch, if any.
    pub fn switch_code(&self) -> Option<&str> {
        match self {
            Self::Switch { code } => Some(code),
            _ => None,
        }
    }
}

impl<G> From<std::sync::PoisonError<G>> for FepError {
    fn from(_error: std::sync::PoisonError<G>) -> Self {
        Self::Poison
    }
}
