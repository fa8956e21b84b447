use crate::{FepError, FepResult};

/// A message type indicator: four decimal digits classifying the message
/// (0200 financial request, 0210 its response, 0400 reversal, 0800
/// network management, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mti(u16);

impl Mti {
    /// Network management request (sign-on, sign-off, echo test).
    pub const NETWORK_MANAGEMENT: Mti = Mti(800);
    /// Financial transaction request.
    pub const FINANCIAL_REQUEST: Mti = Mti(200);
    /// Reversal request.
    pub const REVERSAL_REQUEST: Mti = Mti(400);

    pub fn new(value: u16) -> FepResult<Self> {
        if value > 9_999 {
            return Err(FepError::UsageDetailed(format!(
                "MTI {value} does not fit four digits"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// The four-digit wire form, e.g. "0200".
    pub fn digits(self) -> String {
        format!("{:04}", self.0)
    }

    /// The response indicator paired with this request: request MTI + 10
    /// (0200 -> 0210, 0400 -> 0410, 0800 -> 0810).
    pub fn response(self) -> Mti {
        Mti(self.0 + 10)
    }

    /// True for request-class indicators (the function digit pair is a
    /// request one: x0 or x1 in the last two digits' tens position).
    pub fn is_request(self) -> bool {
        (self.0 / 10) % 10 == 0
    }

    pub fn is_response(self) -> bool {
        (self.0 / 10) % 10 == 1
    }

    /// True for the 08xx network-management class.
    pub fn is_network_management(self) -> bool {
        self.0 / 100 == 8
    }
}

impl std::str::FromStr for Mti {
    type Err = FepError;

    fn from_str(s: &str) -> FepResult<Self> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FepError::UsageDetailed(format!(
                "MTI must be four digits, got {s:?}"
            )));
        }
        Ok(Self(s.parse::<u16>().map_err(|e| {
            FepError::UsageDetailed(format!("invalid MTI {s:?}: {e}"))
        })?))
    }
}

impl std::fmt::Debug for Mti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mti({:04})", self.0)
    }
}

impl std::fmt::Display for Mti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Network management codes carried in field 70 of a 0800 message.
pub mod netmgmt {
    /// Establishes the application-level session.
    pub const SIGN_ON: &str = "001";
    /// Tears the session down.
    pub const SIGN_OFF: &str = "002";
    /// Key exchange with the switch's security module.
    pub const KEY_EXCHANGE: &str = "101";
    /// Liveness probe; the peer answers with 0810 / "00".
    pub const ECHO_TEST: &str = "301";
}

/// Response codes carried in field 39.
pub mod response_code {
    pub const APPROVED: &str = "00";
    pub const DO_NOT_HONOR: &str = "05";
    pub const INVALID_TRANSACTION: &str = "12";
    pub const INVALID_CARD: &str = "14";
    pub const INSUFFICIENT_FUNDS: &str = "51";
    pub const EXPIRED_CARD: &str = "54";
    pub const INCORRECT_PIN: &str = "55";
    pub const NOT_ALLOWED: &str = "57";
    pub const RESPONSE_TOO_LATE: &str = "68";
    pub const ISSUER_UNAVAILABLE: &str = "91";
    pub const SYSTEM_MALFUNCTION: &str = "96";
}
