//! The ADD and DEL state machines of one attachment.
//!
//! ADD: `Init → HostDeviceReady → ContainerNamespace → Addressed → Reported`.
//! DEL: `Init → HostNamespaceRestored → DeviceDestroyed → LeaseReleased → Done`.
//!
//! Failures during ADD are terminal and leave the device wherever it is;
//! DEL tolerates a device that was only partially moved or is already
//! gone.

use std::fmt;
use std::os::fd::AsFd;

use tapcni_common::{DeviceName, TapResult};
use tapcni_ipam::IpamOrchestrator;
use tapcni_network::{LinkManager, NetNs};

use crate::config::{AttachmentRequest, PluginSettings};
use crate::provision::Provisioner;
use crate::result::AttachmentResult;

/// Progress of an ADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddState {
    /// Nothing done yet.
    Init,
    /// The device exists in the host namespace.
    HostDeviceReady,
    /// The device is up inside the container namespace.
    ContainerNamespace,
    /// Addresses and routes are configured.
    Addressed,
    /// The result has been produced.
    Reported,
}

impl fmt::Display for AddState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::HostDeviceReady => "host-device-ready",
            Self::ContainerNamespace => "container-namespace",
            Self::Addressed => "addressed",
            Self::Reported => "reported",
        };
        write!(f, "{s}")
    }
}

/// Progress of a DEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelState {
    /// Nothing done yet.
    Init,
    /// The device is back in the host namespace (or already absent).
    HostNamespaceRestored,
    /// The device has been deleted.
    DeviceDestroyed,
    /// The IPAM lease has been released.
    LeaseReleased,
    /// Teardown complete.
    Done,
}

impl fmt::Display for DelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::HostNamespaceRestored => "host-namespace-restored",
            Self::DeviceDestroyed => "device-destroyed",
            Self::LeaseReleased => "lease-released",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Records and logs state transitions.
#[derive(Debug)]
struct Progress<S> {
    device: DeviceName,
    state: S,
}

impl<S: Copy + fmt::Display> Progress<S> {
    const fn new(device: DeviceName, initial: S) -> Self {
        Self {
            device,
            state: initial,
        }
    }

    fn advance(&mut self, next: S) {
        tracing::info!(device = %self.device, from = %self.state, to = %next, "Attachment state changed");
        self.state = next;
    }
}

/// One attachment of a TAP device to a container.
#[derive(Debug)]
pub struct Attachment {
    request: AttachmentRequest,
    device: DeviceName,
    provisioner: Provisioner,
    ipam: Option<IpamOrchestrator>,
}

impl Attachment {
    /// Prepare an attachment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no device name can be derived
    /// from the container ID.
    pub fn new(request: AttachmentRequest, settings: &PluginSettings) -> TapResult<Self> {
        let device = request.device_name()?;
        let ipam = IpamOrchestrator::from_config(&request.conf.ipam);

        Ok(Self {
            request,
            device,
            provisioner: Provisioner::new(settings),
            ipam,
        })
    }

    /// Replace the IPAM orchestrator chosen from the configuration.
    #[must_use]
    pub fn with_ipam(mut self, ipam: Option<IpamOrchestrator>) -> Self {
        self.ipam = ipam;
        self
    }

    /// The TAP device this attachment manages.
    #[must_use]
    pub const fn device(&self) -> &DeviceName {
        &self.device
    }

    /// Attach the device to the container.
    ///
    /// # Errors
    ///
    /// Returns the first failure. A lease whose application fails is
    /// released before returning.
    pub async fn add(&self) -> TapResult<AttachmentResult> {
        let name = self.device.as_str();
        let mut progress = Progress::new(self.device.clone(), AddState::Init);

        let tap = self.provisioner.provision(&self.device).await?;
        let host_links = LinkManager::connect()?;
        let host_link = host_links.find(name).await?;
        tracing::debug!(device = name, index = host_link.index, "Device present in host namespace");
        progress.advance(AddState::HostDeviceReady);

        let netns = NetNs::open(&self.request.netns)?;
        host_links.move_to_netns(name, netns.as_fd()?).await?;
        // The kernel interface now owns the device; our descriptor is no
        // longer needed.
        drop(tap);

        let ifname = name.to_string();
        let link = netns
            .run_async(move || async move {
                let links = LinkManager::connect()?;
                links.set_up(&ifname).await?;
                links.find(&ifname).await
            })
            .await?
            .in_namespace(netns.path());
        progress.advance(AddState::ContainerNamespace);

        let version = self.request.conf.result_version();
        let result = match &self.ipam {
            Some(ipam) => {
                let lease = ipam
                    .allocate_and_apply(&self.request.ipam_request(), |lease| {
                        let netns = &netns;
                        async move { ipam.apply(netns, &lease, name).await.map(|()| lease) }
                    })
                    .await?;
                progress.advance(AddState::Addressed);
                AttachmentResult::from_lease(version, &link, netns.path(), lease, &self.request.conf.dns)
            }
            None => AttachmentResult::interface_only(version, &link, netns.path()),
        };

        progress.advance(AddState::Reported);
        Ok(result)
    }

    /// Detach and destroy the device and release its lease.
    ///
    /// A device that is already gone, or a container namespace path that
    /// no longer exists, is logged and skipped. The IPAM release runs even
    /// when the device teardown fails.
    ///
    /// # Errors
    ///
    /// Returns the teardown failure if there was one, otherwise the
    /// release failure.
    pub async fn del(&self) -> TapResult<()> {
        let name = self.device.as_str();
        let mut progress = Progress::new(self.device.clone(), DelState::Init);

        let teardown = self.teardown_device(&mut progress).await;
        if let Err(e) = &teardown {
            tracing::warn!(device = name, error = %e, "Device teardown failed, releasing lease anyway");
        }

        let released = match &self.ipam {
            Some(ipam) => {
                let released = ipam.release(&self.request.ipam_request()).await;
                if released.is_ok() {
                    progress.advance(DelState::LeaseReleased);
                }
                released
            }
            None => Ok(()),
        };

        match (teardown, released) {
            (Err(e), Err(release)) => {
                tracing::error!(device = name, error = %release, "Lease release failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(release)) => Err(release),
            (Ok(()), Ok(())) => {
                progress.advance(DelState::Done);
                Ok(())
            }
        }
    }

    /// Verify the attachment. Accepted without checks.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn check(&self) -> TapResult<()> {
        tracing::debug!(device = %self.device, "CHECK accepted without verification");
        Ok(())
    }

    async fn teardown_device(&self, progress: &mut Progress<DelState>) -> TapResult<()> {
        let name = self.device.as_str();

        if self.request.netns.exists() {
            let host = NetNs::current()?;
            let container = NetNs::open(&self.request.netns)?;
            self.return_to_host(&container, &host).await?;
        } else {
            tracing::warn!(
                device = name,
                netns = %self.request.netns.display(),
                "Container namespace gone, skipping device move"
            );
        }
        progress.advance(DelState::HostNamespaceRestored);

        match LinkManager::connect()?.delete(name).await {
            Ok(()) => {}
            Err(e) if e.is_device_not_found() => {
                tracing::warn!(device = name, "Device already absent from host namespace");
            }
            Err(e) => return Err(e),
        }
        if let Err(e) = self.provisioner.shutdown(&self.device) {
            tracing::warn!(device = name, error = %e, "Failed to stop provisioning service");
        }
        progress.advance(DelState::DeviceDestroyed);
        Ok(())
    }

    async fn return_to_host(&self, container: &NetNs, host: &NetNs) -> TapResult<()> {
        let name = self.device.to_string();
        let host_fd = host.as_fd()?.try_clone_to_owned()?;

        let moved = container
            .run_async(move || async move {
                let links = LinkManager::connect()?;
                links.move_to_netns(&name, host_fd.as_fd()).await
            })
            .await;

        match moved {
            Ok(()) => Ok(()),
            Err(e) if e.is_device_not_found() => {
                tracing::warn!(device = %self.device, "Device not in container namespace");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
