//! Allocation, application and rollback of IPAM leases.

use std::future::Future;

use tapcni_common::{TapError, TapResult};
use tapcni_network::{LinkManager, NetNs};

use crate::backend::{IpamBackend, IpamRequest};
use crate::config::IpamConfig;
use crate::exec::ExecBackend;
use crate::lease::IpamLease;
use crate::static_ipam::StaticBackend;

/// Drives one [`IpamBackend`] on behalf of an attachment.
pub struct IpamOrchestrator {
    backend: Box<dyn IpamBackend>,
}

impl std::fmt::Debug for IpamOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpamOrchestrator")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl IpamOrchestrator {
    /// Wrap an explicit backend.
    #[must_use]
    pub fn new(backend: Box<dyn IpamBackend>) -> Self {
        Self { backend }
    }

    /// Select the backend named by the `ipam` section.
    ///
    /// Returns `None` when IPAM is not configured. `static` is served
    /// in-process; every other type is run as a plugin executable.
    #[must_use]
    pub fn from_config(config: &IpamConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }

        let backend: Box<dyn IpamBackend> = if config.backend == StaticBackend::NAME {
            Box::new(StaticBackend::new(config))
        } else {
            Box::new(ExecBackend::new(config.backend.clone()))
        };
        Some(Self::new(backend))
    }

    /// The selected backend.
    #[must_use]
    pub fn backend(&self) -> &dyn IpamBackend {
        self.backend.as_ref()
    }

    /// Obtain a lease.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::IpamAllocation`] if the backend fails.
    pub async fn allocate(&self, request: &IpamRequest) -> TapResult<IpamLease> {
        tracing::info!(backend = self.backend.name(), container = %request.container_id, "Allocating addresses");
        self.backend.allocate(request).await
    }

    /// Return a lease to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::IpamRelease`] if the backend fails.
    pub async fn release(&self, request: &IpamRequest) -> TapResult<()> {
        tracing::info!(backend = self.backend.name(), container = %request.container_id, "Releasing addresses");
        self.backend.release(request).await
    }

    /// Configure `ifname` inside `netns` with the lease.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::IpamApply`] for any failure.
    pub async fn apply(&self, netns: &NetNs, lease: &IpamLease, ifname: &str) -> TapResult<()> {
        let name = ifname.to_string();
        let owned = lease.clone();

        netns
            .run_async(move || async move { configure_interface(&name, &owned).await })
            .await
            .map_err(|e| match e {
                TapError::IpamApply { .. } => e,
                other => TapError::IpamApply {
                    device: ifname.to_string(),
                    message: other.to_string(),
                },
            })
    }

    /// Allocate a lease and hand it to `apply`.
    ///
    /// If `apply` fails the lease is released exactly once before the
    /// apply error is returned. A failing release is logged and does not
    /// replace that error.
    ///
    /// # Errors
    ///
    /// Returns the allocation error, or the error from `apply`.
    pub async fn allocate_and_apply<F, Fut>(&self, request: &IpamRequest, apply: F) -> TapResult<IpamLease>
    where
        F: FnOnce(IpamLease) -> Fut,
        Fut: Future<Output = TapResult<IpamLease>>,
    {
        let lease = self.allocate(request).await?;

        match apply(lease).await {
            Ok(lease) => Ok(lease),
            Err(err) => {
                tracing::warn!(error = %err, "Applying lease failed, releasing it");
                if let Err(release_err) = self.release(request).await {
                    tracing::error!(
                        error = %release_err,
                        container = %request.container_id,
                        "Failed to release lease after apply failure"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Bring `ifname` up and install the lease's addresses and routes.
///
/// Acts on the namespace of the calling thread; call from inside
/// [`NetNs::run_async`] to target a container.
///
/// # Errors
///
/// Returns [`TapError::IpamApply`] naming the step that failed.
pub async fn configure_interface(ifname: &str, lease: &IpamLease) -> TapResult<()> {
    let apply_error = |e: TapError| TapError::IpamApply {
        device: ifname.to_string(),
        message: e.to_string(),
    };

    let links = LinkManager::connect().map_err(apply_error)?;
    links.set_up(ifname).await.map_err(apply_error)?;
    let link = links.find(ifname).await.map_err(apply_error)?;

    for address in &lease.addresses {
        links
            .add_address(&link, address.address)
            .await
            .map_err(apply_error)?;
    }

    for route in &lease.routes {
        let gateway = route.gw.or_else(|| lease.gateway_for(&route.dst));
        links
            .add_route(&link, route.dst, gateway)
            .await
            .map_err(apply_error)?;
    }

    tracing::debug!(
        device = ifname,
        addresses = lease.addresses.len(),
        routes = lease.routes.len(),
        "Interface configured"
    );
    Ok(())
}
