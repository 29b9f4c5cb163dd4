// src/gate/controller.rs - Fire-and-forget enable/disable requests
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{GateError, GateOp, GateService, GateState};

/// Issues gate requests on the runtime without blocking the caller.
///
/// At most one request is outstanding. A request whose target state has
/// already been acknowledged is not re-sent. Completion is only logged and
/// never reported back to the control loop.
#[derive(Clone)]
pub struct GateController {
    service: Arc<dyn GateService>,
    runtime: Handle,
    inner: Arc<Mutex<GateInner>>,
}

#[derive(Default)]
struct GateInner {
    /// Last state asked for, acknowledged or not.
    requested: Option<GateState>,
    /// Last state the service confirmed.
    acknowledged: Option<GateState>,
    pending: Option<GateOp>,
    in_flight: Option<JoinHandle<()>>,
    stats: GateStats,
}

/// Request counters, mostly for tests and the exit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateStats {
    pub issued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl GateController {
    /// Requests are spawned on `runtime`, so they complete on its workers and
    /// not on the thread that calls `enable`/`disable`.
    pub fn new(service: Arc<dyn GateService>, runtime: Handle) -> Self {
        Self {
            service,
            runtime,
            inner: Arc::new(Mutex::new(GateInner::default())),
        }
    }

    pub fn enable(&self) -> Result<(), GateError> {
        self.request(GateOp::Enable)
    }

    pub fn disable(&self) -> Result<(), GateError> {
        self.request(GateOp::Disable)
    }

    /// Last acknowledged state; `Disabled` until the service confirms otherwise.
    pub fn state(&self) -> GateState {
        self.lock().acknowledged.unwrap_or_default()
    }

    pub fn requested(&self) -> Option<GateState> {
        self.lock().requested
    }

    pub fn pending(&self) -> Option<GateOp> {
        self.lock().pending
    }

    pub fn stats(&self) -> GateStats {
        self.lock().stats.clone()
    }

    fn request(&self, op: GateOp) -> Result<(), GateError> {
        let mut inner = self.lock();
        if let Some(pending) = inner.pending {
            return Err(GateError::RequestPending(pending));
        }
        inner.requested = Some(op.target());
        if inner.acknowledged == Some(op.target()) {
            tracing::debug!("Gate already in {:?}, not re-sending {}", op.target(), op);
            inner.stats.skipped += 1;
            return Ok(());
        }

        inner.pending = Some(op);
        inner.stats.issued += 1;
        tracing::info!("Requesting {} ({})", op, self.service.name(op));

        let service = self.service.clone();
        let state = self.inner.clone();
        let handle = self.runtime.spawn(async move {
            let result = service.call(op).await;
            let mut inner = state.lock().unwrap_or_else(|e| e.into_inner());
            inner.pending = None;
            match result {
                Ok(()) => {
                    tracing::info!("Service call succeeded!");
                    inner.acknowledged = Some(op.target());
                    inner.stats.succeeded += 1;
                }
                Err(e) => {
                    tracing::error!("Service call failed: {}", e);
                    inner.stats.failed += 1;
                }
            }
        });
        inner.in_flight = Some(handle);
        Ok(())
    }

    /// Wait up to `grace` for the outstanding request, if any.
    /// Returns false when the request did not finish in time.
    pub async fn settle(&self, grace: Duration) -> bool {
        let handle = self.lock().in_flight.take();
        match handle {
            Some(handle) => match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!("Gate request task ended abnormally: {}", e);
                    true
                }
                Err(_) => {
                    tracing::warn!("Gate request still pending after {:?}", grace);
                    false
                }
            },
            None => true,
        }
    }

    /// Best-effort final disable. Issues it unless one was already requested,
    /// then waits up to `grace` for it to complete.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        if self.requested() != Some(GateState::Disabled) {
            // An enable may still be in flight; disable cannot overlap it.
            self.settle(grace).await;
            if let Err(e) = self.disable() {
                tracing::warn!("Could not request {}: {}", GateOp::Disable, e);
                return;
            }
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.settle(remaining).await;
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for GateController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("GateController")
            .field("requested", &inner.requested)
            .field("acknowledged", &inner.acknowledged)
            .field("pending", &inner.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateService;

    #[tokio::test]
    async fn test_enable_is_acknowledged() {
        let service = Arc::new(MockGateService::new());
        let gate = GateController::new(service.clone(), Handle::current());
        assert_eq!(gate.state(), GateState::Disabled);
        gate.enable().unwrap();
        assert!(gate.settle(Duration::from_secs(1)).await);
        assert_eq!(gate.state(), GateState::Enabled);
        assert_eq!(service.calls(), vec![GateOp::Enable]);
    }

    #[tokio::test]
    async fn test_second_request_while_pending_is_refused() {
        let service = Arc::new(MockGateService::new().with_delay(Duration::from_millis(50)));
        let gate = GateController::new(service.clone(), Handle::current());
        gate.enable().unwrap();
        assert!(matches!(gate.disable(), Err(GateError::RequestPending(GateOp::Enable))));
        assert!(matches!(gate.enable(), Err(GateError::RequestPending(GateOp::Enable))));
        gate.settle(Duration::from_secs(1)).await;
        assert_eq!(gate.pending(), None);
        gate.disable().unwrap();
        gate.settle(Duration::from_secs(1)).await;
        assert_eq!(service.calls(), vec![GateOp::Enable, GateOp::Disable]);
    }

    #[tokio::test]
    async fn test_repeated_enable_is_idempotent() {
        let service = Arc::new(MockGateService::new());
        let gate = GateController::new(service.clone(), Handle::current());
        for _ in 0..3 {
            gate.enable().unwrap();
            gate.settle(Duration::from_secs(1)).await;
        }
        assert_eq!(service.calls(), vec![GateOp::Enable]);
        assert_eq!(gate.stats().skipped, 2);
        assert_eq!(gate.state(), GateState::Enabled);
    }

    #[tokio::test]
    async fn test_failed_request_is_logged_and_retried() {
        let service = Arc::new(MockGateService::new().failing());
        let gate = GateController::new(service.clone(), Handle::current());
        gate.enable().unwrap();
        gate.settle(Duration::from_secs(1)).await;
        assert_eq!(gate.state(), GateState::Disabled);
        assert_eq!(gate.stats().failed, 1);

        // Not acknowledged, so a second enable goes out again.
        gate.enable().unwrap();
        gate.settle(Duration::from_secs(1)).await;
        assert_eq!(service.calls(), vec![GateOp::Enable, GateOp::Enable]);
    }

    #[tokio::test]
    async fn test_shutdown_waits_out_pending_enable() {
        let service = Arc::new(MockGateService::new().with_delay(Duration::from_millis(30)));
        let gate = GateController::new(service.clone(), Handle::current());
        gate.enable().unwrap();
        gate.shutdown(Duration::from_secs(1)).await;
        assert_eq!(service.calls(), vec![GateOp::Enable, GateOp::Disable]);
        assert_eq!(gate.state(), GateState::Disabled);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_repeat_requested_disable() {
        let service = Arc::new(MockGateService::new());
        let gate = GateController::new(service.clone(), Handle::current());
        gate.enable().unwrap();
        gate.settle(Duration::from_secs(1)).await;
        gate.disable().unwrap();
        gate.shutdown(Duration::from_secs(1)).await;
        assert_eq!(service.calls(), vec![GateOp::Enable, GateOp::Disable]);
    }
}
