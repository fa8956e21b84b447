use crate::{conn::LinkParams, FepError, FepResult};

/// A builder for [`LinkParams`].
///
/// Both endpoints are mandatory; the institution id defaults to empty for
/// test rigs that do not authenticate by institution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkParamsBuilder {
    send_host: Option<String>,
    send_port: Option<u16>,
    receive_host: Option<String>,
    receive_port: Option<u16>,
    institution_id: Option<String>,
}

impl LinkParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the send-side endpoint.
    #[must_use]
    pub fn send(mut self, host: impl Into<String>, port: u16) -> Self {
        self.send_host = Some(host.into());
        self.send_port = Some(port);
        self
    }

    /// Sets the receive-side endpoint.
    #[must_use]
    pub fn receive(mut self, host: impl Into<String>, port: u16) -> Self {
        self.receive_host = Some(host.into());
        self.receive_port = Some(port);
        self
    }

    /// Sets the institution identifier.
    #[must_use]
    pub fn institution_id(mut self, id: impl Into<String>) -> Self {
        self.institution_id = Some(id.into());
        self
    }

    /// Constructs the `LinkParams`.
    pub fn build(self) -> FepResult<LinkParams> {
        let send_host = self
            .send_host
            .ok_or(FepError::Usage("send endpoint is missing"))?;
        let send_port = self
            .send_port
            .ok_or(FepError::Usage("send endpoint is missing"))?;
        let receive_host = self
            .receive_host
            .ok_or(FepError::Usage("receive endpoint is missing"))?;
        let receive_port = self
            .receive_port
            .ok_or(FepError::Usage("receive endpoint is missing"))?;
        Ok(LinkParams::new(
            send_host,
            send_port,
            receive_host,
            receive_port,
            self.institution_id.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::LinkParamsBuilder;

    #[test]
    fn test_builds_addrs() {
        let params = LinkParamsBuilder::new()
            .send("10.0.0.7", 7101)
            .receive("10.0.0.7", 7102)
            .institution_id("9990001")
            .build()
            .unwrap();
        assert_eq!(params.send_addr(), "10.0.0.7:7101");
        assert_eq!(params.receive_addr(), "10.0.0.7:7102");
        assert_eq!(params.institution_id(), "9990001");
    }

    #[test]
    fn test_missing_endpoint_fails() {
        assert!(LinkParamsBuilder::new().send("h", 1).build().is_err());
        assert!(LinkParamsBuilder::new().receive("h", 1).build().is_err());
    }
}
