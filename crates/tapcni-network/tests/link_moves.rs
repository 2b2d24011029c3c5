//! Integration tests for TAP creation and namespace moves.
//!
//! These need root (CAP_NET_ADMIN, CAP_SYS_ADMIN), `/dev/net/tun` and
//! iproute2, so they are ignored by default:
//! `sudo -E cargo test -p tapcni-network -- --ignored`

use std::path::PathBuf;
use std::process::Command;

use tapcni_common::DeviceName;
use tapcni_network::{LinkManager, NetNs, TapDevice};

/// Named network namespace removed on drop.
struct ScratchNetns {
    name: String,
}

impl ScratchNetns {
    fn new() -> Self {
        let name = format!("tapcni-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let status = Command::new("ip")
            .args(["netns", "add", &name])
            .status()
            .unwrap();
        assert!(status.success(), "ip netns add failed");
        Self { name }
    }

    fn path(&self) -> PathBuf {
        PathBuf::from("/var/run/netns").join(&self.name)
    }
}

impl Drop for ScratchNetns {
    fn drop(&mut self) {
        let _ = Command::new("ip")
            .args(["netns", "delete", &self.name])
            .status();
    }
}

fn device_name() -> DeviceName {
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..5];
    DeviceName::new(format!("tapt{suffix}")).unwrap()
}

#[test_log::test(tokio::test)]
#[ignore = "requires root and /dev/net/tun"]
async fn created_device_is_visible_by_name() {
    let name = device_name();
    let device = TapDevice::create(&name).unwrap();

    let links = LinkManager::connect().unwrap();
    let link = links.find(name.as_str()).await.unwrap();
    assert_eq!(link.name, name.as_str());
    assert_eq!(link.mac.len(), 17);

    let info = device.info().unwrap();
    assert!(info.is_tap());
    assert!(!info.packet_info());
}

#[test_log::test(tokio::test)]
#[ignore = "requires root, /dev/net/tun and iproute2"]
async fn move_round_trip_restores_visibility() {
    let scratch = ScratchNetns::new();
    let name = device_name();
    let _device = TapDevice::create(&name).unwrap();

    let host = NetNs::current().unwrap();
    let other = NetNs::open(scratch.path()).unwrap();
    let links = LinkManager::connect().unwrap();

    // A -> B
    links
        .move_to_netns(name.as_str(), other.as_fd().unwrap())
        .await
        .unwrap();
    assert!(!links.exists(name.as_str()).await.unwrap());

    let lookup = name.to_string();
    let seen_in_other = other
        .run_async(move || async move { LinkManager::connect()?.exists(&lookup).await })
        .await
        .unwrap();
    assert!(seen_in_other);

    // B -> A, driven from inside B.
    let host_fd = host.as_fd().unwrap().try_clone_to_owned().unwrap();
    let moving = name.to_string();
    other
        .run_async(move || async move {
            let links = LinkManager::connect()?;
            links.move_to_netns(&moving, std::os::fd::AsFd::as_fd(&host_fd)).await?;
            links.exists(&moving).await
        })
        .await
        .map(|still_there| assert!(!still_there))
        .unwrap();

    assert!(links.exists(name.as_str()).await.unwrap());
}

#[test_log::test(tokio::test)]
#[ignore = "requires root and iproute2"]
async fn moving_a_missing_device_is_not_found() {
    let scratch = ScratchNetns::new();
    let other = NetNs::open(scratch.path()).unwrap();
    let links = LinkManager::connect().unwrap();

    let err = links
        .move_to_netns("tapmissing", other.as_fd().unwrap())
        .await
        .unwrap_err();
    assert!(err.is_device_not_found());
}
