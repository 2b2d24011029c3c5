//! The capability every IPAM backend provides.

use std::path::PathBuf;

use async_trait::async_trait;
use tapcni_common::TapResult;

use crate::lease::IpamLease;

/// Everything a backend needs to serve one invocation.
#[derive(Debug, Clone, Default)]
pub struct IpamRequest {
    /// Container ID.
    pub container_id: String,
    /// Container network namespace path.
    pub netns: PathBuf,
    /// Interface name requested by the runtime.
    pub ifname: String,
    /// Extra `CNI_ARGS`.
    pub args: String,
    /// Directories searched for backend executables.
    pub cni_path: Vec<PathBuf>,
    /// The network configuration, byte for byte as received.
    pub config: Vec<u8>,
}

/// An address management backend.
///
/// `release` must be idempotent: releasing something never allocated, or
/// already released, succeeds without effect.
#[async_trait]
pub trait IpamBackend: Send + Sync {
    /// Backend type name, as written in the configuration.
    fn name(&self) -> &str;

    /// Allocate addresses for the request.
    async fn allocate(&self, request: &IpamRequest) -> TapResult<IpamLease>;

    /// Release whatever was allocated for the request.
    async fn release(&self, request: &IpamRequest) -> TapResult<()>;
}
