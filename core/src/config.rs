//! Client engine configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::version::Version;

/// Options shared by the sender and receiver engines
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the rendezvous server
    pub rendezvous_addr: String,
    /// When set, refuse rendezvous servers with a different major version
    pub version: Option<Version>,
    /// Skip the direct probe and always relay (receiver)
    pub force_relay: bool,
    /// Address announced for the direct listener (sender); defaults to the
    /// outbound interface address
    pub advertise_ip: Option<Ipv4Addr>,
    /// Total budget for reaching the sender's direct listener
    pub probe_deadline: Duration,
    /// First retry delay of the direct probe; doubles each attempt
    pub probe_initial_backoff: Duration,
    /// Bound on control-message waits after the transfer has started
    pub io_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rendezvous_addr: "127.0.0.1:8080".to_string(),
            version: None,
            force_relay: false,
            advertise_ip: None,
            probe_deadline: Duration::from_secs(3),
            probe_initial_backoff: Duration::from_millis(250),
            io_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new(rendezvous_addr: impl Into<String>) -> Self {
        Self {
            rendezvous_addr: rendezvous_addr.into(),
            ..Self::default()
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("ws://{}/{}", self.rendezvous_addr, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.probe_deadline, Duration::from_secs(3));
        assert_eq!(config.probe_initial_backoff, Duration::from_millis(250));
        assert!(!config.force_relay);
        assert!(config.version.is_none());
        assert!(config.advertise_ip.is_none());
    }

    #[test]
    fn test_endpoint_url() {
        let config = ClientConfig::new("relay.example:9009");
        assert_eq!(
            config.endpoint("establish-sender"),
            "ws://relay.example:9009/establish-sender"
        );
    }
}
