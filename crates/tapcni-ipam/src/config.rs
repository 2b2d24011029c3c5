//! The `ipam` section of the network configuration.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::lease::{LeaseAddress, Route};

/// IPAM configuration.
///
/// Only the fields this plugin inspects are modelled. External backends
/// receive the whole raw configuration, so fields they need but this
/// struct ignores are still delivered to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Backend type, e.g. `host-local`. Empty means IPAM is disabled.
    #[serde(rename = "type", default)]
    pub backend: String,

    /// Subnet to allocate from (host-local style).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<IpNet>,

    /// Routes to install in the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    /// Fixed addresses (static backend).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<LeaseAddress>,
}

impl IpamConfig {
    /// Whether a backend is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.backend.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_local_section() {
        let config: IpamConfig = serde_json::from_str(
            r#"{"type":"host-local","subnet":"10.0.0.0/24","routes":[{"dst":"0.0.0.0/0"}],"rangeStart":"10.0.0.10"}"#,
        )
        .unwrap();

        assert!(config.is_configured());
        assert_eq!(config.backend, "host-local");
        assert_eq!(config.subnet, Some("10.0.0.0/24".parse().unwrap()));
        assert_eq!(config.routes.len(), 1);
        assert!(config.routes[0].gw.is_none());
    }

    #[test]
    fn missing_section_is_disabled() {
        let config = IpamConfig::default();
        assert!(!config.is_configured());
    }

    #[test]
    fn invalid_subnet_is_rejected() {
        let parsed = serde_json::from_str::<IpamConfig>(r#"{"type":"host-local","subnet":"10.0.0.0/33"}"#);
        assert!(parsed.is_err());
    }
}
