//! End-to-end ADD/DEL against real namespaces.
//!
//! Apart from the DEL checks these need root, `/dev/net/tun`,
//! the `ip` tool, `tapudsserver` built next to this test binary and the
//! `host-local` IPAM plugin in `/opt/cni/bin`. Run with
//! `cargo test -- --ignored`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tapcni::{Attachment, AttachmentRequest, NetConf, PluginSettings};
use tapcni_common::{ContainerId, TapError, TapPaths, TapResult};
use tapcni_ipam::{IpamBackend, IpamLease, IpamOrchestrator, IpamRequest};
use tapcni_network::{LinkManager, NetNs};

const HOST_LOCAL_CONF: &str = r#"{
    "cniVersion": "1.0.0",
    "name": "tapnet",
    "type": "tap-plugin",
    "ipam": {"type": "host-local", "subnet": "10.0.0.0/24", "routes": [{"dst": "0.0.0.0/0"}]}
}"#;

const NO_IPAM_CONF: &str = r#"{"cniVersion":"1.0.0","name":"tapnet","type":"tap-plugin"}"#;

/// Backend that counts releases and optionally fails them.
struct CountingBackend {
    releases: Arc<AtomicUsize>,
    fail_release: bool,
}

#[async_trait]
impl IpamBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn allocate(&self, _request: &IpamRequest) -> TapResult<IpamLease> {
        Ok(IpamLease::default())
    }

    async fn release(&self, _request: &IpamRequest) -> TapResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(TapError::IpamRelease {
                backend: "counting".into(),
                message: "lease store unavailable".into(),
            });
        }
        Ok(())
    }
}

fn counting_ipam(fail_release: bool) -> (Option<IpamOrchestrator>, Arc<AtomicUsize>) {
    let releases = Arc::new(AtomicUsize::new(0));
    let backend = CountingBackend {
        releases: Arc::clone(&releases),
        fail_release,
    };
    (Some(IpamOrchestrator::new(Box::new(backend))), releases)
}

struct ScratchNetns {
    name: String,
    path: PathBuf,
}

impl ScratchNetns {
    fn new() -> Self {
        let name = format!("tapcni-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let status = Command::new("ip").args(["netns", "add", &name]).status().unwrap();
        assert!(status.success(), "ip netns add {name}");
        Self {
            path: PathBuf::from("/var/run/netns").join(&name),
            name,
        }
    }
}

impl Drop for ScratchNetns {
    fn drop(&mut self) {
        let _ = Command::new("ip").args(["netns", "delete", &self.name]).status();
    }
}

fn server_program() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    exe.parent().and_then(Path::parent).unwrap().join("tapudsserver")
}

fn attachment(container_id: &str, netns: &Path, sockets: &Path, raw: &str) -> Attachment {
    let request = AttachmentRequest {
        container_id: ContainerId::new(container_id).unwrap(),
        netns: netns.to_path_buf(),
        ifname: "eth0".into(),
        args: String::new(),
        cni_path: vec![PathBuf::from("/opt/cni/bin")],
        raw: raw.as_bytes().to_vec(),
        conf: NetConf::parse(raw.as_bytes()).unwrap(),
    };
    let settings = PluginSettings {
        paths: TapPaths::with_socket_dir(sockets),
        server_program: server_program(),
        ready_timeout: Duration::from_secs(5),
    };
    Attachment::new(request, &settings).unwrap()
}

async fn link_exists_in(netns: &Path, name: &'static str) -> bool {
    NetNs::open(netns)
        .unwrap()
        .run_async(move || async move { LinkManager::connect()?.exists(name).await })
        .await
        .unwrap()
}

#[test_log::test(tokio::test)]
#[ignore = "requires root, tapudsserver and host-local"]
async fn test_add_then_del_with_host_local() {
    let sockets = tempfile::tempdir().unwrap();
    let container = ScratchNetns::new();
    let attachment = attachment("abcdef123", &container.path, sockets.path(), HOST_LOCAL_CONF);
    assert_eq!(attachment.device().as_str(), "tapabcde");

    let result = attachment.add().await.unwrap();
    assert_eq!(result.interfaces.len(), 1);
    assert_eq!(result.interfaces[0].name, "tapabcde");
    assert_eq!(result.interfaces[0].sandbox, container.path.display().to_string());
    assert_eq!(result.ips.len(), 1);
    let subnet: ipnet::IpNet = "10.0.0.0/24".parse().unwrap();
    assert!(subnet.contains(&result.ips[0].address.addr()));

    assert!(link_exists_in(&container.path, "tapabcde").await);
    assert!(!LinkManager::connect().unwrap().exists("tapabcde").await.unwrap());

    attachment.del().await.unwrap();
    assert!(!link_exists_in(&container.path, "tapabcde").await);
    assert!(!LinkManager::connect().unwrap().exists("tapabcde").await.unwrap());

    // A second DEL finds nothing to move or delete and still succeeds.
    attachment.del().await.unwrap();
}

#[test_log::test(tokio::test)]
#[ignore = "requires root and tapudsserver"]
async fn test_add_without_ipam_reports_interface_only() {
    let sockets = tempfile::tempdir().unwrap();
    let container = ScratchNetns::new();
    let attachment = attachment(
        "fedcba987",
        &container.path,
        sockets.path(),
        NO_IPAM_CONF,
    );

    let result = attachment.add().await.unwrap();
    assert_eq!(result.interfaces[0].name, "tapfedcb");
    assert!(!result.interfaces[0].mac.is_empty());
    assert!(result.ips.is_empty());

    attachment.del().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_del_with_missing_namespace_is_idempotent() {
    let sockets = tempfile::tempdir().unwrap();
    let attachment = attachment(
        "0123456789",
        Path::new("/var/run/netns/tapcni-does-not-exist"),
        sockets.path(),
        NO_IPAM_CONF,
    );

    attachment.del().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_del_of_absent_device_releases_once_per_call() {
    let sockets = tempfile::tempdir().unwrap();
    let (ipam, releases) = counting_ipam(false);
    let attachment = attachment(
        "5678901234",
        Path::new("/var/run/netns/tapcni-does-not-exist"),
        sockets.path(),
        NO_IPAM_CONF,
    )
    .with_ipam(ipam);

    attachment.del().await.unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    attachment.del().await.unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test)]
async fn test_del_releases_even_when_namespace_step_fails() {
    let sockets = tempfile::tempdir().unwrap();
    let (ipam, releases) = counting_ipam(false);
    // Exists, but is a UTS namespace.
    let attachment = attachment("9876543210", Path::new("/proc/self/ns/uts"), sockets.path(), NO_IPAM_CONF)
        .with_ipam(ipam);

    let err = attachment.del().await.unwrap_err();
    assert!(matches!(err, TapError::Namespace { .. }), "unexpected error: {err}");
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_del_reports_release_failure() {
    let sockets = tempfile::tempdir().unwrap();
    let (ipam, releases) = counting_ipam(true);
    let attachment = attachment(
        "4567890123",
        Path::new("/var/run/netns/tapcni-does-not-exist"),
        sockets.path(),
        NO_IPAM_CONF,
    )
    .with_ipam(ipam);

    let err = attachment.del().await.unwrap_err();
    assert_eq!(err.code(), 107);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
