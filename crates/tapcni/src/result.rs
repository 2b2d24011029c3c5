//! Documents printed on stdout.

use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tapcni_common::TapError;
use tapcni_ipam::{Dns, IpamLease, Route};
use tapcni_network::VirtualInterface;

use crate::config::SUPPORTED_VERSIONS;

/// An interface reported in a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceEntry {
    /// Interface name.
    pub name: String,
    /// Hardware address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    /// Namespace path the interface lives in.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

/// An address reported in a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpEntry {
    /// Address family, `"4"` or `"6"`. Only results before 1.0.0 carry it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Index into `interfaces`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    /// Address with prefix length.
    pub address: IpNet,
    /// Gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

/// Successful ADD result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentResult {
    /// Result version.
    pub cni_version: String,
    /// Interfaces created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceEntry>,
    /// Addresses assigned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpEntry>,
    /// Routes installed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    /// DNS settings.
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

impl AttachmentResult {
    /// Result carrying only the identity of the attached interface.
    #[must_use]
    pub fn interface_only(version: &str, link: &VirtualInterface, sandbox: &Path) -> Self {
        Self {
            cni_version: version.to_string(),
            interfaces: vec![InterfaceEntry {
                name: link.name.clone(),
                mac: link.mac.clone(),
                sandbox: sandbox.display().to_string(),
            }],
            ips: Vec::new(),
            routes: Vec::new(),
            dns: Dns::default(),
        }
    }

    /// Result for an interface configured from `lease`.
    ///
    /// Every address is attributed to the single interface. DNS settings
    /// from the configuration take precedence over the backend's.
    #[must_use]
    pub fn from_lease(
        version: &str,
        link: &VirtualInterface,
        sandbox: &Path,
        lease: IpamLease,
        configured_dns: &Dns,
    ) -> Self {
        let tag_family = tags_address_family(version);
        let dns = if configured_dns.is_empty() {
            lease.dns
        } else {
            configured_dns.clone()
        };

        Self {
            ips: lease
                .addresses
                .into_iter()
                .map(|a| IpEntry {
                    version: tag_family.then(|| address_family(&a.address).to_string()),
                    interface: Some(0),
                    address: a.address,
                    gateway: a.gateway,
                })
                .collect(),
            routes: lease.routes,
            dns,
            ..Self::interface_only(version, link, sandbox)
        }
    }
}

/// Whether results of `version` tag each address with its family.
fn tags_address_family(version: &str) -> bool {
    version.starts_with("0.3.") || version.starts_with("0.4.")
}

fn address_family(address: &IpNet) -> &'static str {
    match address {
        IpNet::V4(_) => "4",
        IpNet::V6(_) => "6",
    }
}

/// Error document printed when an invocation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDocument {
    /// Result version.
    pub cni_version: String,
    /// Error code.
    pub code: u32,
    /// Short message.
    pub msg: String,
    /// Additional detail.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorDocument {
    /// Describe `err`.
    #[must_use]
    pub fn from_error(version: &str, err: &TapError) -> Self {
        let details = miette::Diagnostic::help(err)
            .map(|help| help.to_string())
            .unwrap_or_default();

        Self {
            cni_version: version.to_string(),
            code: err.code(),
            msg: err.to_string(),
            details,
        }
    }
}

/// Answer to `VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDocument {
    /// Version of this document.
    pub cni_version: String,
    /// Result versions the plugin can emit.
    pub supported_versions: Vec<String>,
}

impl VersionDocument {
    /// The versions this plugin supports.
    #[must_use]
    pub fn new(version: &str) -> Self {
        Self {
            cni_version: version.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tap() -> VirtualInterface {
        VirtualInterface {
            name: "tapabcde".into(),
            index: 7,
            mac: "02:42:ac:11:00:0a".into(),
            up: true,
            namespace: None,
        }
    }

    fn lease() -> IpamLease {
        serde_json::from_value(json!({
            "ips": [{"address": "10.0.0.2/24", "gateway": "10.0.0.1"}],
            "routes": [{"dst": "0.0.0.0/0"}],
            "dns": {"nameservers": ["10.0.0.1"]}
        }))
        .unwrap()
    }

    #[test]
    fn interface_only_result() {
        let result = AttachmentResult::interface_only("1.0.0", &tap(), Path::new("/var/run/netns/c1"));

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "cniVersion": "1.0.0",
                "interfaces": [{
                    "name": "tapabcde",
                    "mac": "02:42:ac:11:00:0a",
                    "sandbox": "/var/run/netns/c1"
                }]
            })
        );
    }

    #[test]
    fn lease_result_attributes_addresses_to_the_interface() {
        let result = AttachmentResult::from_lease(
            "1.0.0",
            &tap(),
            Path::new("/var/run/netns/c1"),
            lease(),
            &Dns::default(),
        );

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "cniVersion": "1.0.0",
                "interfaces": [{
                    "name": "tapabcde",
                    "mac": "02:42:ac:11:00:0a",
                    "sandbox": "/var/run/netns/c1"
                }],
                "ips": [{"interface": 0, "address": "10.0.0.2/24", "gateway": "10.0.0.1"}],
                "routes": [{"dst": "0.0.0.0/0"}],
                "dns": {"nameservers": ["10.0.0.1"]}
            })
        );
    }

    #[test]
    fn pre_1_0_results_tag_address_family() {
        let mut lease = lease();
        lease.addresses.push(serde_json::from_value(json!({"address": "fd00::2/64"})).unwrap());

        for version in ["0.3.0", "0.3.1", "0.4.0"] {
            let result = AttachmentResult::from_lease(version, &tap(), Path::new("/x"), lease.clone(), &Dns::default());
            let value = serde_json::to_value(&result).unwrap();
            assert_eq!(value["ips"][0]["version"], "4", "{version}");
            assert_eq!(value["ips"][1]["version"], "6", "{version}");
        }

        let result = AttachmentResult::from_lease("1.1.0", &tap(), Path::new("/x"), lease, &Dns::default());
        let value = serde_json::to_value(&result).unwrap();
        assert!(value["ips"][0].get("version").is_none());
    }

    #[test]
    fn configured_dns_wins() {
        let configured = Dns {
            nameservers: vec!["1.1.1.1".into()],
            search: vec!["cluster.local".into()],
            ..Dns::default()
        };
        let result = AttachmentResult::from_lease("1.0.0", &tap(), Path::new("/x"), lease(), &configured);
        assert_eq!(result.dns, configured);
    }

    #[test]
    fn error_document_carries_code() {
        let err = TapError::config("containerID is required");
        let doc = ErrorDocument::from_error("0.4.0", &err);
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["cniVersion"], "0.4.0");
        assert_eq!(value["code"], 7);
        assert!(value["msg"].as_str().unwrap().contains("containerID is required"));
    }

    #[test]
    fn version_document() {
        let value = serde_json::to_value(VersionDocument::new("1.0.0")).unwrap();
        assert_eq!(value["cniVersion"], "1.0.0");
        assert!(value["supportedVersions"].as_array().unwrap().contains(&json!("0.4.0")));
    }
}
