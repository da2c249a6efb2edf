//! Single-flight refresh coordinator
//!
//! Every caller whose request failed with a refresh-eligible 401 calls
//! `await_refresh`. The first caller while the coordinator is `Idle` opens a
//! wave: the state flips to `Refreshing` and one refresh exchange starts.
//! Callers arriving while `Refreshing` join that wave instead of starting
//! another. When the exchange resolves, every waiter of the wave receives the
//! same outcome and the state returns to `Idle`, so the next 401 opens a new
//! wave.
//!
//! The wave runs on its own task. A caller that is dropped mid-wait only loses
//! its own result; the exchange, escalation and the release of the remaining
//! waiters carry on. A panicking exchange resolves the wave with
//! `RefreshError::Abandoned` rather than leaving waiters parked.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tracing::{error, info, warn};

use crate::classify::FailureKind;
use crate::endpoint::RefreshEndpoint;
use crate::error::RefreshError;
use crate::escalation::FailureEscalation;
use crate::metrics;

type Outcome = Result<(), RefreshError>;

/// Whether a refresh wave is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// State and waiters live under one lock so that joining a wave and
/// releasing it can never interleave.
struct WaveState {
    state: RefreshState,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

pub struct RefreshCoordinator {
    endpoint: Arc<dyn RefreshEndpoint>,
    escalation: FailureEscalation,
    refresh_timeout: Option<Duration>,
    inner: Mutex<WaveState>,
    waves: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(endpoint: Arc<dyn RefreshEndpoint>, escalation: FailureEscalation) -> Self {
        Self {
            endpoint,
            escalation,
            refresh_timeout: None,
            inner: Mutex::new(WaveState {
                state: RefreshState::Idle,
                waiters: Vec::new(),
            }),
            waves: AtomicU64::new(0),
        }
    }

    /// Bound each exchange; an exchange that overruns fails its wave with
    /// `RefreshError::Timeout`.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    pub async fn state(&self) -> RefreshState {
        self.inner.lock().await.state
    }

    /// Callers parked on the current wave.
    pub async fn pending_waiters(&self) -> usize {
        self.inner.lock().await.waiters.len()
    }

    /// Waves started since construction.
    pub fn waves(&self) -> u64 {
        self.waves.load(Ordering::Relaxed)
    }

    /// Join the current refresh wave, opening one if none is in flight, and
    /// wait for its outcome.
    pub async fn await_refresh(self: &Arc<Self>) -> Outcome {
        let (tx, rx) = oneshot::channel();

        let opened = {
            let mut inner = self.inner.lock().await;
            inner.waiters.push(tx);
            match inner.state {
                RefreshState::Refreshing => false,
                RefreshState::Idle => {
                    inner.state = RefreshState::Refreshing;
                    true
                }
            }
        };

        if opened {
            let wave = self.waves.fetch_add(1, Ordering::Relaxed) + 1;
            let coordinator = Arc::clone(self);
            tokio::spawn(async move { coordinator.run_wave(wave).await });
        }

        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    async fn run_wave(self: Arc<Self>, wave: u64) {
        info!(wave, "starting token refresh");
        let outcome = self.exchange().await;

        // Still Refreshing here: 401s arriving during escalation join this
        // wave and receive its failure.
        if let Err(e) = &outcome {
            metrics::record_failure(FailureKind::RefreshFailure);
            self.escalation.escalate(e).await;
        }

        let released = {
            let mut inner = self.inner.lock().await;
            inner.state = RefreshState::Idle;
            let waiters = std::mem::take(&mut inner.waiters);
            let released = waiters.len();
            for waiter in waiters {
                // Receiver gone means that caller was dropped
                let _ = waiter.send(outcome.clone());
            }
            released
        };

        metrics::record_wave(outcome.is_ok(), released);
        match &outcome {
            Ok(()) => info!(wave, waiters = released, "token refresh complete"),
            Err(e) => warn!(wave, waiters = released, error = %e, "token refresh failed"),
        }
    }

    /// Run the endpoint on its own task so a panic surfaces as a `JoinError`.
    async fn exchange(&self) -> Outcome {
        let endpoint = Arc::clone(&self.endpoint);
        let mut handle = tokio::spawn(async move { endpoint.refresh().await });

        let joined = match self.refresh_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(RefreshError::Timeout(limit));
                }
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|e| {
            error!(error = %e, "refresh exchange ended without an outcome");
            Err(RefreshError::Abandoned)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::{MemoryTokenStore, Navigator, SessionTokens, TokenStore};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Semaphore;

    /// Endpoint that blocks on a gate and then returns scripted outcomes
    /// (`Ok` once the script runs out).
    struct ScriptedEndpoint {
        calls: AtomicUsize,
        gate: Semaphore,
        script: std::sync::Mutex<VecDeque<Outcome>>,
    }

    impl ScriptedEndpoint {
        fn new(script: Vec<Outcome>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(0),
                script: std::sync::Mutex::new(script.into()),
            }
        }

        fn open(&self) {
            self.gate.add_permits(1);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RefreshEndpoint for ScriptedEndpoint {
        fn refresh(&self) -> Pin<Box<dyn Future<Output = Outcome> + Send + '_>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.gate.acquire().await.unwrap().forget();
                self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
            })
        }
    }

    async fn explode() -> Outcome {
        panic!("refresh endpoint blew up")
    }

    async fn stall() -> Outcome {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    struct PanickingEndpoint;

    impl RefreshEndpoint for PanickingEndpoint {
        fn refresh(&self) -> Pin<Box<dyn Future<Output = Outcome> + Send + '_>> {
            Box::pin(explode())
        }
    }

    struct StalledEndpoint;

    impl RefreshEndpoint for StalledEndpoint {
        fn refresh(&self) -> Pin<Box<dyn Future<Output = Outcome> + Send + '_>> {
            Box::pin(stall())
        }
    }

    /// Memory store whose `clear` parks on a gate, holding escalation open.
    struct GatedClearStore {
        inner: MemoryTokenStore,
        clearing: AtomicBool,
        gate: Semaphore,
    }

    impl GatedClearStore {
        fn new() -> Self {
            Self {
                inner: MemoryTokenStore::with_tokens(SessionTokens::new("at").with_refresh("rt")),
                clearing: AtomicBool::new(false),
                gate: Semaphore::new(0),
            }
        }
    }

    impl TokenStore for GatedClearStore {
        fn tokens(&self) -> Pin<Box<dyn Future<Output = Option<SessionTokens>> + Send + '_>> {
            self.inner.tokens()
        }

        fn store(
            &self,
            tokens: SessionTokens,
        ) -> Pin<Box<dyn Future<Output = session::Result<()>> + Send + '_>> {
            self.inner.store(tokens)
        }

        fn clear(&self) -> Pin<Box<dyn Future<Output = session::Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.clearing.store(true, Ordering::SeqCst);
                self.gate.acquire().await.unwrap().forget();
                self.inner.clear().await
            })
        }
    }

    #[derive(Default)]
    struct CountingNavigator {
        count: AtomicUsize,
    }

    impl Navigator for CountingNavigator {
        fn go_to_unauthenticated_entry(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        coordinator: Arc<RefreshCoordinator>,
        store: Arc<MemoryTokenStore>,
        navigator: Arc<CountingNavigator>,
    }

    fn harness(endpoint: Arc<dyn RefreshEndpoint>) -> Harness {
        let store = Arc::new(MemoryTokenStore::with_tokens(
            SessionTokens::new("at").with_refresh("rt"),
        ));
        let navigator = Arc::new(CountingNavigator::default());
        let escalation = FailureEscalation::new(store.clone(), navigator.clone());
        Harness {
            coordinator: Arc::new(RefreshCoordinator::new(endpoint, escalation)),
            store,
            navigator,
        }
    }

    fn invalid_grant() -> RefreshError {
        RefreshError::Rejected {
            status: 400,
            message: "invalid_grant".into(),
        }
    }

    async fn wait_for_waiters(coordinator: &RefreshCoordinator, expected: usize) {
        for _ in 0..1000 {
            if coordinator.pending_waiters().await == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("never reached {expected} waiters");
    }

    async fn wait_for_idle(coordinator: &RefreshCoordinator) {
        for _ in 0..1000 {
            if coordinator.state().await == RefreshState::Idle {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("coordinator never returned to idle");
    }

    fn spawn_callers(
        coordinator: &Arc<RefreshCoordinator>,
        n: usize,
    ) -> Vec<tokio::task::JoinHandle<Outcome>> {
        (0..n)
            .map(|_| {
                let coordinator = Arc::clone(coordinator);
                tokio::spawn(async move { coordinator.await_refresh().await })
            })
            .collect()
    }

    #[tokio::test]
    async fn starts_idle() {
        let h = harness(Arc::new(ScriptedEndpoint::new(vec![])));
        assert_eq!(h.coordinator.state().await, RefreshState::Idle);
        assert_eq!(h.coordinator.pending_waiters().await, 0);
        assert_eq!(h.coordinator.waves(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_exchange() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let h = harness(endpoint.clone());

        let callers = spawn_callers(&h.coordinator, 5);
        wait_for_waiters(&h.coordinator, 5).await;
        assert_eq!(h.coordinator.state().await, RefreshState::Refreshing);

        endpoint.open();
        for caller in callers {
            assert_eq!(caller.await.unwrap(), Ok(()));
        }

        assert_eq!(endpoint.calls(), 1);
        assert_eq!(h.coordinator.waves(), 1);
        assert_eq!(h.coordinator.state().await, RefreshState::Idle);
        assert_eq!(h.coordinator.pending_waiters().await, 0);
        assert_eq!(h.navigator.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_escalates_once() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![Err(invalid_grant())]));
        let h = harness(endpoint.clone());

        let callers = spawn_callers(&h.coordinator, 5);
        wait_for_waiters(&h.coordinator, 5).await;

        endpoint.open();
        for caller in callers {
            assert_eq!(caller.await.unwrap(), Err(invalid_grant()));
        }

        assert_eq!(endpoint.calls(), 1);
        assert_eq!(h.navigator.count.load(Ordering::SeqCst), 1);
        assert!(h.store.tokens().await.is_none());
    }

    #[tokio::test]
    async fn sequential_failures_open_separate_waves() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![Ok(()), Err(invalid_grant())]));
        let h = harness(endpoint.clone());

        endpoint.open();
        assert_eq!(h.coordinator.await_refresh().await, Ok(()));
        wait_for_idle(&h.coordinator).await;

        endpoint.open();
        assert_eq!(h.coordinator.await_refresh().await, Err(invalid_grant()));

        assert_eq!(endpoint.calls(), 2);
        assert_eq!(h.coordinator.waves(), 2);
        assert_eq!(h.navigator.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callers_arriving_during_escalation_join_the_failing_wave() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![Err(invalid_grant())]));
        let store = Arc::new(GatedClearStore::new());
        let navigator = Arc::new(CountingNavigator::default());
        let coordinator = Arc::new(RefreshCoordinator::new(
            endpoint.clone(),
            FailureEscalation::new(store.clone(), navigator.clone()),
        ));

        let first = spawn_callers(&coordinator, 1).remove(0);
        wait_for_waiters(&coordinator, 1).await;
        endpoint.open();

        for _ in 0..1000 {
            if store.clearing.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(store.clearing.load(Ordering::SeqCst), "escalation never reached clear");
        assert_eq!(coordinator.state().await, RefreshState::Refreshing);

        let late = spawn_callers(&coordinator, 1).remove(0);
        wait_for_waiters(&coordinator, 2).await;
        store.gate.add_permits(1);

        assert_eq!(first.await.unwrap(), Err(invalid_grant()));
        assert_eq!(late.await.unwrap(), Err(invalid_grant()));
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(coordinator.waves(), 1);
        assert_eq!(navigator.count.load(Ordering::SeqCst), 1);
        assert!(store.tokens().await.is_none());
        wait_for_idle(&coordinator).await;
    }

    #[tokio::test]
    async fn late_callers_after_release_open_a_new_wave() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let h = harness(endpoint.clone());

        let first = spawn_callers(&h.coordinator, 2);
        wait_for_waiters(&h.coordinator, 2).await;
        endpoint.open();
        for caller in first {
            assert_eq!(caller.await.unwrap(), Ok(()));
        }
        wait_for_idle(&h.coordinator).await;

        let second = spawn_callers(&h.coordinator, 3);
        wait_for_waiters(&h.coordinator, 3).await;
        endpoint.open();
        for caller in second {
            assert_eq!(caller.await.unwrap(), Ok(()));
        }
        assert_eq!(endpoint.calls(), 2);
        assert_eq!(h.coordinator.waves(), 2);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_strand_the_wave() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let h = harness(endpoint.clone());

        let opener = spawn_callers(&h.coordinator, 1).remove(0);
        wait_for_waiters(&h.coordinator, 1).await;
        opener.abort();
        assert!(opener.await.unwrap_err().is_cancelled());

        let joiner = spawn_callers(&h.coordinator, 1).remove(0);
        wait_for_waiters(&h.coordinator, 2).await;
        endpoint.open();

        assert_eq!(joiner.await.unwrap(), Ok(()));
        assert_eq!(endpoint.calls(), 1);
        wait_for_idle(&h.coordinator).await;
    }

    #[tokio::test]
    async fn panicking_exchange_resolves_as_abandoned() {
        let h = harness(Arc::new(PanickingEndpoint));

        let callers = spawn_callers(&h.coordinator, 3);
        for caller in callers {
            assert_eq!(caller.await.unwrap(), Err(RefreshError::Abandoned));
        }

        assert_eq!(h.navigator.count.load(Ordering::SeqCst), 1);
        wait_for_idle(&h.coordinator).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_exchange_times_out() {
        let store = Arc::new(MemoryTokenStore::with_tokens(SessionTokens::new("at")));
        let navigator = Arc::new(CountingNavigator::default());
        let coordinator = Arc::new(
            RefreshCoordinator::new(
                Arc::new(StalledEndpoint),
                FailureEscalation::new(store.clone(), navigator.clone()),
            )
            .with_refresh_timeout(Duration::from_secs(15)),
        );

        let outcome = coordinator.await_refresh().await;

        assert_eq!(outcome, Err(RefreshError::Timeout(Duration::from_secs(15))));
        assert_eq!(navigator.count.load(Ordering::SeqCst), 1);
        assert!(store.tokens().await.is_none());
    }
}
