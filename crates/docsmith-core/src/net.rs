//! Outbound HTTP client construction.
//!
//! Every component that talks to the outside world (LLM provider, embedding
//! provider, chat APIs) builds its client here so the operator's dual-stack
//! preference applies uniformly.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::Result;

/// Build a reqwest client honouring the operator's IPv4 preference.
///
/// Binding the local side to `0.0.0.0` forces IPv4 source addresses, so
/// providers whose DNS answers lead with AAAA records are still reached on
/// hosts without a routable IPv6 path.
pub fn http_client(network: &NetworkConfig, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if network.prefer_ipv4 {
        builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_ipv4_preference() {
        let network = NetworkConfig {
            prefer_ipv4: true,
            adapter_fetch_timeout_secs: 30,
        };
        assert!(http_client(&network, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn builds_without_preference() {
        let network = NetworkConfig::default();
        assert!(http_client(&network, Duration::from_secs(5)).is_ok());
    }
}
