use crate::conn::LinkParamsBuilder;

/// An immutable struct with all addressing information necessary to open
/// a dual-channel link to the switch.
///
/// Requests leave through the *send* endpoint, responses arrive through
/// the independent *receive* endpoint.
///
/// ```rust,no_run
/// use fisclink::LinkParams;
/// let params = LinkParams::builder()
///     .send("fisc-gw.example.com", 7101)
///     .receive("fisc-gw.example.com", 7102)
///     .institution_id("9990001")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkParams {
    send_host: String,
    send_addr: String,
    receive_host: String,
    receive_addr: String,
    institution_id: String,
}

impl LinkParams {
    pub(crate) fn new(
        send_host: String,
        send_port: u16,
        receive_host: String,
        receive_port: u16,
        institution_id: String,
    ) -> Self {
        Self {
            send_addr: format!("{send_host}:{send_port}"),
            send_host,
            receive_addr: format!("{receive_host}:{receive_port}"),
            receive_host,
            institution_id,
        }
    }

    /// Returns a new builder for `LinkParams`.
    pub fn builder() -> LinkParamsBuilder {
        LinkParamsBuilder::new()
    }

    /// The send-side host.
    pub fn send_host(&self) -> &str {
        &self.send_host
    }

    /// The send-side socket address.
    pub fn send_addr(&self) -> &str {
        &self.send_addr
    }

    /// The receive-side host.
    pub fn receive_host(&self) -> &str {
        &self.receive_host
    }

    /// The receive-side socket address.
    pub fn receive_addr(&self) -> &str {
        &self.receive_addr
    }

    /// The institution identifier the switch knows this FEP by.
    pub fn institution_id(&self) -> &str {
        &self.institution_id
    }
}

impl std::fmt::Display for LinkParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "send {} / receive {} (institution {})",
            self.send_addr, self.receive_addr, self.institution_id
        )
    }
}
