//! Per-connection configuration: admission limits, deadlines, and the
//! identity fields the context negotiator announces on first use.
//!
//! Generalizes the teacher's `ConnectionOptions`/`ConnectionOptBuilder`
//! (`src/conn.rs`) from "how to authenticate and which database" to "how
//! this transport connection should behave", since authentication and
//! resource addressing are out of scope for this core (spec §1).

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Upper bound on simultaneously in-flight requests once context is
    /// established (spec §4.4, §8).
    pub pending_request_limit: usize,
    /// Default per-request deadline, used unless a caller supplies its
    /// own in `RequestArgs`.
    pub request_timeout: Duration,
    /// Deadline for the initial TCP/TLS handshake and the context
    /// negotiation that follows it.
    pub connect_timeout: Duration,
    pub client_version: &'static str,
    pub client_identifier: String,
    pub user_agent: String,
    pub protocol_version: u32,
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            pending_request_limit: 1_000,
            request_timeout: Duration::from_secs(65),
            connect_timeout: Duration::from_secs(10),
            client_version: env!("CARGO_PKG_VERSION"),
            client_identifier: String::new(),
            user_agent: format!("rntbd/{}", env!("CARGO_PKG_VERSION")),
            protocol_version: 1,
        }
    }
}

#[derive(Default)]
pub struct ConnectionConfigBuilder {
    inner: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn pending_request_limit(mut self, limit: usize) -> Self {
        self.inner.pending_request_limit = limit;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.inner.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connect_timeout = timeout;
        self
    }

    pub fn client_identifier<S: Into<String>>(mut self, id: S) -> Self {
        self.inner.client_identifier = id.into();
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, agent: S) -> Self {
        self.inner.user_agent = agent.into();
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = ConnectionConfig::builder()
            .pending_request_limit(16)
            .request_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(cfg.pending_request_limit, 16);
        assert_eq!(cfg.request_timeout, Duration::from_millis(250));
    }
}
