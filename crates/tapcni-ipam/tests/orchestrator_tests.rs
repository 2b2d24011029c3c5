//! Rollback behaviour of the IPAM orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tapcni_common::{TapError, TapResult};
use tapcni_ipam::{IpamBackend, IpamConfig, IpamLease, IpamOrchestrator, IpamRequest};

#[derive(Default)]
struct Counters {
    allocations: AtomicUsize,
    releases: AtomicUsize,
}

struct MockBackend {
    counters: Arc<Counters>,
    fail_allocate: bool,
    fail_release: bool,
}

impl MockBackend {
    fn new(counters: &Arc<Counters>) -> Self {
        Self {
            counters: Arc::clone(counters),
            fail_allocate: false,
            fail_release: false,
        }
    }
}

#[async_trait]
impl IpamBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn allocate(&self, _request: &IpamRequest) -> TapResult<IpamLease> {
        self.counters.allocations.fetch_add(1, Ordering::SeqCst);
        if self.fail_allocate {
            return Err(TapError::IpamAllocation {
                backend: "mock".into(),
                message: "pool exhausted".into(),
            });
        }
        Ok(serde_json::from_str(r#"{"ips":[{"address":"10.0.0.2/24","gateway":"10.0.0.1"}]}"#).unwrap())
    }

    async fn release(&self, _request: &IpamRequest) -> TapResult<()> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(TapError::IpamRelease {
                backend: "mock".into(),
                message: "store unavailable".into(),
            });
        }
        Ok(())
    }
}

fn apply_failure() -> TapError {
    TapError::IpamApply {
        device: "eth0".into(),
        message: "address add failed".into(),
    }
}

#[test_log::test(tokio::test)]
async fn test_apply_failure_releases_once() {
    let counters = Arc::new(Counters::default());
    let ipam = IpamOrchestrator::new(Box::new(MockBackend::new(&counters)));

    let err = ipam
        .allocate_and_apply(&IpamRequest::default(), |_lease| async { Err(apply_failure()) })
        .await
        .unwrap_err();

    assert!(matches!(err, TapError::IpamApply { .. }));
    assert_eq!(counters.allocations.load(Ordering::SeqCst), 1);
    assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_success_keeps_lease() {
    let counters = Arc::new(Counters::default());
    let ipam = IpamOrchestrator::new(Box::new(MockBackend::new(&counters)));

    let lease = ipam
        .allocate_and_apply(&IpamRequest::default(), |lease| async move { Ok(lease) })
        .await
        .unwrap();

    assert_eq!(lease.addresses.len(), 1);
    assert_eq!(counters.releases.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn test_allocation_failure_skips_apply_and_release() {
    let counters = Arc::new(Counters::default());
    let mut backend = MockBackend::new(&counters);
    backend.fail_allocate = true;
    let ipam = IpamOrchestrator::new(Box::new(backend));

    let applied = AtomicUsize::new(0);
    let err = ipam
        .allocate_and_apply(&IpamRequest::default(), |lease| {
            applied.fetch_add(1, Ordering::SeqCst);
            async move { Ok(lease) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TapError::IpamAllocation { .. }));
    assert_eq!(applied.load(Ordering::SeqCst), 0);
    assert_eq!(counters.releases.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn test_apply_error_wins_over_release_error() {
    let counters = Arc::new(Counters::default());
    let mut backend = MockBackend::new(&counters);
    backend.fail_release = true;
    let ipam = IpamOrchestrator::new(Box::new(backend));

    let err = ipam
        .allocate_and_apply(&IpamRequest::default(), |_lease| async { Err(apply_failure()) })
        .await
        .unwrap_err();

    assert!(matches!(err, TapError::IpamApply { .. }));
    assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_backend_selection() {
    let none = IpamOrchestrator::from_config(&IpamConfig::default());
    assert!(none.is_none());

    let config: IpamConfig = serde_json::from_str(r#"{"type":"static"}"#).unwrap();
    let ipam = IpamOrchestrator::from_config(&config).unwrap();
    assert_eq!(ipam.backend().name(), "static");

    let config: IpamConfig = serde_json::from_str(r#"{"type":"host-local"}"#).unwrap();
    let ipam = IpamOrchestrator::from_config(&config).unwrap();
    assert_eq!(ipam.backend().name(), "host-local");
}
