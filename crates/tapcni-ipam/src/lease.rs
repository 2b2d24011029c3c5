//! Backend-neutral allocation results.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// An address assigned to the interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseAddress {
    /// Address with prefix length, e.g. `10.0.0.2/24`.
    pub address: IpNet,
    /// Gateway for this address' subnet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

/// A route to install in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination network.
    pub dst: IpNet,
    /// Next hop. Defaults to the lease gateway of the same family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// DNS settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    /// Name servers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    /// Local domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Search domains.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    /// Resolver options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    /// Whether no DNS setting is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_none()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

/// Addresses and routes allocated for one attachment.
///
/// Deserializes from the result document an IPAM plugin prints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamLease {
    /// Allocated addresses.
    #[serde(rename = "ips", default)]
    pub addresses: Vec<LeaseAddress>,
    /// Routes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    /// DNS settings from the backend.
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

impl IpamLease {
    /// Gateway of the first address that has one.
    #[must_use]
    pub fn gateway(&self) -> Option<IpAddr> {
        self.addresses.iter().find_map(|a| a.gateway)
    }

    /// Gateway to use for a route towards `dst` that names none.
    #[must_use]
    pub fn gateway_for(&self, dst: &IpNet) -> Option<IpAddr> {
        self.addresses
            .iter()
            .filter_map(|a| a.gateway)
            .find(|gw| gw.is_ipv4() == dst.addr().is_ipv4())
    }
}
