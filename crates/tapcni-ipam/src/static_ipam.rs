//! In-process backend handing out the addresses listed in the configuration.

use async_trait::async_trait;
use tapcni_common::{TapError, TapResult};

use crate::backend::{IpamBackend, IpamRequest};
use crate::config::IpamConfig;
use crate::lease::IpamLease;

/// Backend for `"type": "static"`.
///
/// Nothing is tracked, so releasing is always a no-op.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    lease: IpamLease,
}

impl StaticBackend {
    /// Type name selecting this backend.
    pub const NAME: &'static str = "static";

    /// Build the backend from the `ipam` section.
    #[must_use]
    pub fn new(config: &IpamConfig) -> Self {
        Self {
            lease: IpamLease {
                addresses: config.addresses.clone(),
                routes: config.routes.clone(),
                ..IpamLease::default()
            },
        }
    }
}

#[async_trait]
impl IpamBackend for StaticBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn allocate(&self, _request: &IpamRequest) -> TapResult<IpamLease> {
        if self.lease.addresses.is_empty() {
            return Err(TapError::IpamAllocation {
                backend: Self::NAME.to_string(),
                message: "no addresses configured".to_string(),
            });
        }
        Ok(self.lease.clone())
    }

    async fn release(&self, _request: &IpamRequest) -> TapResult<()> {
        Ok(())
    }
}
