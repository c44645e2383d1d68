//! ConnectionManager: supervised link to one remote endpoint
//!
//! Owns the transport connection to an [`Endpoint`] and exposes current
//! connectivity as a small state machine. Connection loss is handled
//! internally: whenever the manager is not closing, it silently redials
//! until the peer is reachable again. The caller learns about transitions
//! in exactly one of two ways:
//!
//! - **push**: a single observer, invoked with every up/down transition.
//!   All transitions flow through one dedicated notifier task, so the
//!   observer is never reentered and never races with itself.
//! - **poll**: [`ConnectionManager::is_operational`] /
//!   [`ConnectionManager::session`], point-in-time snapshots that may lag
//!   observer delivery.
//!
//! `close` cancels the supervision task and joins both background tasks
//! before returning, so no notification can fire after it completes.

use crate::endpoint::Endpoint;
use crate::error::LinkError;
use crate::transport::{Session, Transport};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long the supervisor waits between failed dial attempts.
const REDIAL_INTERVAL: Duration = Duration::from_millis(200);

/// Connectivity of one [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link and nobody trying to establish one.
    Closed,
    /// Supervisor is dialing (or waiting to redial).
    Connecting,
    /// A session is live; remote calls may succeed.
    Operational,
    /// `close` has been requested; teardown in progress.
    Closing,
}

/// One connectivity transition, as delivered to the observer.
///
/// `session` is `Some` exactly when `operational` is true, so the observer
/// can bind interfaces without racing a separate session lookup.
#[derive(Clone)]
pub struct Transition {
    pub operational: bool,
    pub session: Option<Arc<dyn Session>>,
}

type Observer = Arc<dyn Fn(Transition) -> BoxFuture<'static, ()> + Send + Sync>;

struct Running {
    token: CancellationToken,
    supervisor: JoinHandle<()>,
    notifier: JoinHandle<()>,
}

/// Supervised connection to one endpoint.
///
/// # Example
///
/// ```rust,no_run
/// use tether_link::{ConnectionManager, Endpoint, Transport};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint = Endpoint::new("/tmp/tether-communicator".parse()?);
/// let mut manager = ConnectionManager::new(transport, endpoint);
///
/// manager.on_state_change(|transition| async move {
///     println!("operational: {}", transition.operational);
/// });
///
/// manager.open(Duration::from_secs(3)).await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    observer: Option<Observer>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Arc<Mutex<Option<Arc<dyn Session>>>>,
    running: Mutex<Option<Running>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, endpoint: Endpoint) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            endpoint,
            transport,
            observer: None,
            state: Arc::new(state),
            session: Arc::new(Mutex::new(None)),
            running: Mutex::new(None),
        }
    }

    /// Register the observer. Exactly one; must be set before `open`.
    ///
    /// The observer runs on the manager's notifier task. It must not call
    /// `close` on this manager (that would wait on its own task).
    pub fn on_state_change<F, Fut>(&mut self, observer: F)
    where
        F: Fn(Transition) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.observer = Some(Arc::new(move |transition| Box::pin(observer(transition))));
    }

    /// Begin establishing the link. Idempotent while already open.
    ///
    /// Waits up to `timeout` for the outcome of the first dial and returns
    /// its transport-level rejection, if any. Later failures are not
    /// surfaced: the supervisor keeps redialing until `close`.
    pub async fn open(&self, timeout: Duration) -> Result<(), LinkError> {
        let first_rx = {
            let mut running = self.running.lock().await;
            if running.is_some() {
                return Ok(());
            }

            let token = CancellationToken::new();
            let (transitions_tx, transitions_rx) = mpsc::unbounded_channel();
            let (first_tx, first_rx) = oneshot::channel();

            self.state.send_replace(ConnectionState::Connecting);

            let notifier = tokio::spawn(deliver(transitions_rx, self.observer.clone()));
            let supervisor = tokio::spawn(supervise(
                Arc::clone(&self.transport),
                self.endpoint.clone(),
                timeout,
                Arc::clone(&self.session),
                Arc::clone(&self.state),
                transitions_tx,
                first_tx,
                token.clone(),
            ));

            *running = Some(Running {
                token,
                supervisor,
                notifier,
            });
            first_rx
        };

        match tokio::time::timeout(timeout, first_rx).await {
            Ok(Ok(result)) => result,
            // Supervisor gone before reporting; treat as torn down.
            Ok(Err(_)) => Err(LinkError::AlreadyClosed),
            Err(_) => Err(LinkError::Timeout(timeout)),
        }
    }

    /// Tear the link down and wait for quiescence.
    ///
    /// Delivers a final down transition if the link was operational. Safe
    /// to call from any task except the observer itself; idempotent.
    pub async fn close(&self, timeout: Duration) -> Result<(), LinkError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        self.state.send_replace(ConnectionState::Closing);
        running.token.cancel();

        let joined = tokio::time::timeout(timeout, async {
            let _ = running.supervisor.await;
            let _ = running.notifier.await;
        })
        .await;

        self.session.lock().await.take();
        self.state.send_replace(ConnectionState::Closed);

        match joined {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(endpoint = %self.endpoint, "close timed out waiting for quiescence");
                Err(LinkError::Timeout(timeout))
            }
        }
    }

    /// Point-in-time connectivity snapshot. Not synchronized with observer
    /// delivery: a caller may still see `false` right after an up
    /// transition was dispatched.
    pub fn is_operational(&self) -> bool {
        matches!(*self.state.borrow(), ConnectionState::Operational)
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The live session, while operational.
    pub async fn session(&self) -> Option<Arc<dyn Session>> {
        self.session.lock().await.clone()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Notifier task: delivers transitions to the observer one at a time, in
/// arrival order. Consecutive transitions always alternate in value —
/// the supervisor only emits a flip.
async fn deliver(
    mut transitions: mpsc::UnboundedReceiver<Transition>,
    observer: Option<Observer>,
) {
    let mut last: Option<bool> = None;
    while let Some(transition) = transitions.recv().await {
        debug_assert_ne!(last, Some(transition.operational));
        last = Some(transition.operational);

        if let Some(observer) = &observer {
            observer(transition).await;
        }
    }
}

/// Supervision task: dial, hold the session until it is lost, emit the
/// down transition, redial. Dial failures are logged and retried; they
/// only surface through `first` (the opening call's own rejection).
#[allow(clippy::too_many_arguments)]
async fn supervise(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    dial_timeout: Duration,
    session_slot: Arc<Mutex<Option<Arc<dyn Session>>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    transitions: mpsc::UnboundedSender<Transition>,
    first: oneshot::Sender<Result<(), LinkError>>,
    token: CancellationToken,
) {
    let mut first = Some(first);

    loop {
        let dialed = tokio::select! {
            _ = token.cancelled() => break,
            dialed = transport.dial(&endpoint, dial_timeout) => dialed,
        };

        match dialed {
            Ok(session) => {
                *session_slot.lock().await = Some(Arc::clone(&session));
                state.send_replace(ConnectionState::Operational);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }
                info!(endpoint = %endpoint, "link operational");
                let _ = transitions.send(Transition {
                    operational: true,
                    session: Some(Arc::clone(&session)),
                });

                let mut closed = session.closed();
                let lost = loop {
                    if *closed.borrow() {
                        break true;
                    }
                    tokio::select! {
                        _ = token.cancelled() => break false,
                        changed = closed.changed() => {
                            if changed.is_err() {
                                break true;
                            }
                        }
                    }
                };

                session_slot.lock().await.take();
                if lost {
                    state.send_replace(ConnectionState::Connecting);
                    info!(endpoint = %endpoint, "link lost; redialing");
                }
                let _ = transitions.send(Transition {
                    operational: false,
                    session: None,
                });
                session.detach();

                if !lost {
                    break;
                }
            }
            Err(e) => {
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e));
                } else {
                    debug!(endpoint = %endpoint, error = %e, "dial failed; will retry");
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(REDIAL_INTERVAL) => {}
                }
            }
        }
    }
    // Dropping `transitions` lets the notifier drain and exit.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CapabilityRef, LeaseId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubSession {
        closed: watch::Sender<bool>,
    }

    #[async_trait]
    impl Session for StubSession {
        async fn acquire(
            &self,
            _capability: &str,
            _timeout: Duration,
        ) -> Result<Option<CapabilityRef>, LinkError> {
            Ok(None)
        }

        fn release(&self, _lease: LeaseId) {}

        fn closed(&self) -> watch::Receiver<bool> {
            self.closed.subscribe()
        }

        fn detach(&self) {}
    }

    struct StubTransport {
        reachable: AtomicBool,
        last_session: Mutex<Option<Arc<StubSession>>>,
    }

    impl StubTransport {
        fn new(reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                last_session: Mutex::new(None),
            })
        }

        fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }

        async fn drop_session(&self) {
            if let Some(session) = self.last_session.lock().await.take() {
                session.closed.send_replace(true);
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn dial(
            &self,
            _endpoint: &Endpoint,
            _timeout: Duration,
        ) -> Result<Arc<dyn Session>, LinkError> {
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(LinkError::TransportUnavailable("stub offline".to_string()));
            }
            let (closed, _) = watch::channel(false);
            let session = Arc::new(StubSession { closed });
            *self.last_session.lock().await = Some(Arc::clone(&session));
            Ok(session)
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("/tmp/test-channel".parse().unwrap())
    }

    async fn wait_until(mut probe: impl FnMut() -> bool) {
        for _ in 0..200 {
            if probe() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_open_reaches_operational() {
        let transport = StubTransport::new(true);
        let manager = ConnectionManager::new(transport, endpoint());

        manager.open(Duration::from_secs(1)).await.unwrap();
        assert!(manager.is_operational());
        assert!(manager.session().await.is_some());

        manager.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_initial_rejection_surfaces_then_retries_silently() {
        let transport = StubTransport::new(false);
        let manager = ConnectionManager::new(Arc::clone(&transport) as _, endpoint());

        let result = manager.open(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(LinkError::TransportUnavailable(_))));
        assert!(!manager.is_operational());

        // Peer comes up later; the supervisor finds it without another open.
        transport.set_reachable(true);
        wait_until(|| manager.is_operational()).await;

        manager.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_is_idempotent_while_open() {
        let transport = StubTransport::new(true);
        let manager = ConnectionManager::new(transport, endpoint());

        manager.open(Duration::from_secs(1)).await.unwrap();
        manager.open(Duration::from_secs(1)).await.unwrap();
        assert!(manager.is_operational());

        manager.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_transitions_alternate_across_session_loss() {
        let transport = StubTransport::new(true);
        let seen: Arc<std::sync::Mutex<Vec<bool>>> = Arc::default();

        let mut manager = ConnectionManager::new(Arc::clone(&transport) as _, endpoint());
        let sink = Arc::clone(&seen);
        manager.on_state_change(move |transition| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(transition.operational);
            }
        });

        manager.open(Duration::from_secs(1)).await.unwrap();
        wait_until(|| seen.lock().unwrap().as_slice() == [true]).await;

        transport.drop_session().await;
        wait_until(|| seen.lock().unwrap().len() >= 3).await;

        manager.close(Duration::from_secs(1)).await.unwrap();

        let observed = seen.lock().unwrap().clone();
        for pair in observed.windows(2) {
            assert_ne!(pair[0], pair[1], "transitions must strictly alternate");
        }
        assert_eq!(observed[0], true);
    }

    #[tokio::test]
    async fn test_close_quiesces_notifications() {
        let transport = StubTransport::new(true);
        let seen: Arc<std::sync::Mutex<Vec<bool>>> = Arc::default();

        let mut manager = ConnectionManager::new(Arc::clone(&transport) as _, endpoint());
        let sink = Arc::clone(&seen);
        manager.on_state_change(move |transition| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(transition.operational);
            }
        });

        manager.open(Duration::from_secs(1)).await.unwrap();
        wait_until(|| !seen.lock().unwrap().is_empty()).await;

        manager.close(Duration::from_secs(1)).await.unwrap();
        let settled = seen.lock().unwrap().clone();
        assert_eq!(settled.last(), Some(&false));

        // Nothing may arrive after close has returned.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().unwrap(), settled);

        // The manager can be reopened after a close.
        manager.open(Duration::from_secs(1)).await.unwrap();
        wait_until(|| manager.is_operational()).await;
        manager.close(Duration::from_secs(1)).await.unwrap();
    }
}
