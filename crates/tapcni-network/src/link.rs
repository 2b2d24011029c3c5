//! Interface lookup, activation, namespace moves and removal over netlink.
//!
//! A [`LinkManager`] talks to the namespace its netlink socket was opened
//! in. To act on another namespace, connect from inside
//! [`NetNs::run_async`](crate::NetNs::run_async).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use ipnet::IpNet;
use netlink_packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
use rtnetlink::{Handle, LinkUnspec, RouteMessageBuilder};
use tapcni_common::{TapError, TapResult};

/// A network interface as seen from one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualInterface {
    /// Interface name.
    pub name: String,
    /// Kernel interface index, only meaningful in the owning namespace.
    pub index: u32,
    /// Hardware address, `aa:bb:cc:dd:ee:ff`.
    pub mac: String,
    /// Whether the interface is administratively up.
    pub up: bool,
    /// Owning namespace, when known.
    pub namespace: Option<PathBuf>,
}

impl VirtualInterface {
    fn from_message(message: &LinkMessage) -> Self {
        let mut name = String::new();
        let mut mac = String::new();
        for attribute in &message.attributes {
            match attribute {
                LinkAttribute::IfName(n) => name.clone_from(n),
                LinkAttribute::Address(bytes) => mac = format_mac(bytes),
                _ => {}
            }
        }

        Self {
            name,
            index: message.header.index,
            mac,
            up: message.header.flags.contains(LinkFlags::Up),
            namespace: None,
        }
    }

    /// Record the namespace this interface was found in.
    #[must_use]
    pub fn in_namespace(mut self, path: &Path) -> Self {
        self.namespace = Some(path.to_path_buf());
        self
    }
}

/// Format a hardware address as colon-separated lowercase hex.
#[must_use]
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Netlink client bound to the namespace it was created in.
#[derive(Debug, Clone)]
pub struct LinkManager {
    handle: Handle,
}

impl LinkManager {
    /// Open a netlink connection in the current thread's namespace.
    ///
    /// Must be called within a tokio runtime; the connection task is
    /// spawned onto it.
    ///
    /// # Errors
    ///
    /// Returns an error if the netlink socket cannot be opened.
    pub fn connect() -> TapResult<Self> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| TapError::Internal {
            message: format!("Failed to open netlink socket: {e}"),
        })?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Look up an interface by name.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::DeviceNotFound`] if no interface has that name.
    pub async fn find(&self, name: &str) -> TapResult<VirtualInterface> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();

        match links.try_next().await {
            Ok(Some(message)) => Ok(VirtualInterface::from_message(&message)),
            Ok(None) => Err(not_found(name)),
            Err(e) if is_no_device(&e) => Err(not_found(name)),
            Err(e) => Err(netlink_error("get", name, &e)),
        }
    }

    /// Whether an interface with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error for netlink failures other than a missing device.
    pub async fn exists(&self, name: &str) -> TapResult<bool> {
        match self.find(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_device_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Set an interface administratively up.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::DeviceNotFound`] or [`TapError::Netlink`].
    pub async fn set_up(&self, name: &str) -> TapResult<()> {
        let link = self.find(name).await?;

        self.handle
            .link()
            .set(LinkUnspec::new_with_index(link.index).up().build())
            .execute()
            .await
            .map_err(|e| netlink_error("set up", name, &e))?;

        tracing::debug!(device = name, "Link set up");
        Ok(())
    }

    /// Move an interface into the namespace behind `target`.
    ///
    /// The interface vanishes from this namespace and appears in the
    /// target in one kernel operation. Its administrative state is not
    /// carried over reliably; call [`set_up`](Self::set_up) from the
    /// target namespace afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::DeviceNotFound`] if the interface is not in this
    /// namespace, [`TapError::MoveRejected`] if the kernel refuses the move.
    pub async fn move_to_netns(&self, name: &str, target: BorrowedFd<'_>) -> TapResult<()> {
        let link = self.find(name).await?;

        self.handle
            .link()
            .set(
                LinkUnspec::new_with_index(link.index)
                    .setns_by_fd(target.as_raw_fd())
                    .build(),
            )
            .execute()
            .await
            .map_err(|e| {
                if is_no_device(&e) {
                    not_found(name)
                } else {
                    TapError::MoveRejected {
                        device: name.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        tracing::debug!(device = name, "Link moved to namespace");
        Ok(())
    }

    /// Delete an interface.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::DeviceNotFound`] or [`TapError::Netlink`].
    pub async fn delete(&self, name: &str) -> TapResult<()> {
        let link = self.find(name).await?;

        self.handle
            .link()
            .del(link.index)
            .execute()
            .await
            .map_err(|e| {
                if is_no_device(&e) {
                    not_found(name)
                } else {
                    netlink_error("delete", name, &e)
                }
            })?;

        tracing::debug!(device = name, "Link deleted");
        Ok(())
    }

    /// Add an address with its prefix length to an interface.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Netlink`] if the kernel rejects the address.
    pub async fn add_address(&self, link: &VirtualInterface, address: IpNet) -> TapResult<()> {
        self.handle
            .address()
            .add(link.index, address.addr(), address.prefix_len())
            .execute()
            .await
            .map_err(|e| netlink_error("address add", &link.name, &e))?;

        tracing::debug!(device = %link.name, %address, "Address added");
        Ok(())
    }

    /// Add a route through an interface, optionally via a gateway.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Netlink`] if the gateway family does not match
    /// the destination or the kernel rejects the route.
    pub async fn add_route(
        &self,
        link: &VirtualInterface,
        destination: IpNet,
        gateway: Option<IpAddr>,
    ) -> TapResult<()> {
        let message = match destination {
            IpNet::V4(dst) => {
                let builder = RouteMessageBuilder::<Ipv4Addr>::new()
                    .destination_prefix(dst.addr(), dst.prefix_len())
                    .output_interface(link.index);
                match gateway {
                    None => builder.build(),
                    Some(IpAddr::V4(gw)) => builder.gateway(gw).build(),
                    Some(IpAddr::V6(gw)) => return Err(family_mismatch(link, destination, gw.into())),
                }
            }
            IpNet::V6(dst) => {
                let builder = RouteMessageBuilder::<Ipv6Addr>::new()
                    .destination_prefix(dst.addr(), dst.prefix_len())
                    .output_interface(link.index);
                match gateway {
                    None => builder.build(),
                    Some(IpAddr::V6(gw)) => builder.gateway(gw).build(),
                    Some(IpAddr::V4(gw)) => return Err(family_mismatch(link, destination, gw.into())),
                }
            }
        };

        self.handle
            .route()
            .add(message)
            .execute()
            .await
            .map_err(|e| netlink_error("route add", &link.name, &e))?;

        tracing::debug!(device = %link.name, %destination, ?gateway, "Route added");
        Ok(())
    }
}

fn is_no_device(err: &rtnetlink::Error) -> bool {
    matches!(
        err,
        rtnetlink::Error::NetlinkError(message)
            if message.code.is_some_and(|code| code.get() == -libc::ENODEV)
    )
}

fn not_found(name: &str) -> TapError {
    TapError::DeviceNotFound {
        device: name.to_string(),
    }
}

fn netlink_error(operation: &str, name: &str, err: &rtnetlink::Error) -> TapError {
    TapError::Netlink {
        operation: operation.to_string(),
        device: name.to_string(),
        message: err.to_string(),
    }
}

fn family_mismatch(link: &VirtualInterface, destination: IpNet, gateway: IpAddr) -> TapError {
    TapError::Netlink {
        operation: "route add".to_string(),
        device: link.name.clone(),
        message: format!("gateway {gateway} does not match the family of {destination}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_formatting() {
        assert_eq!(
            format_mac(&[0x02, 0x42, 0xac, 0x11, 0x00, 0x0a]),
            "02:42:ac:11:00:0a"
        );
        assert_eq!(format_mac(&[]), "");
    }

    #[tokio::test]
    async fn missing_link_is_not_found() {
        let links = LinkManager::connect().unwrap();
        let err = links.find("tapcni-nope0").await.unwrap_err();
        assert!(err.is_device_not_found());
        assert!(!links.exists("tapcni-nope0").await.unwrap());
    }

    #[tokio::test]
    async fn loopback_is_found() {
        let links = LinkManager::connect().unwrap();
        let lo = links.find("lo").await.unwrap();
        assert_eq!(lo.name, "lo");
        assert!(lo.index > 0);
        assert!(lo.namespace.is_none());
    }
}
