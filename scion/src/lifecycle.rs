//! Lifecycle supervision: serving, draining, termination, orphan watch

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The process-wide lifecycle state.
///
/// There is exactly one instance per process, owned by the [`Supervisor`]
/// and mutated only through its transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Handshake not yet emitted.
    Starting,
    /// Accepting and dispatching domain RPCs.
    Serving,
    /// Cooperative shutdown requested; no new RPCs, waiting on in-flight.
    Draining,
    /// Nothing further will be served; the process is about to exit.
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

struct Inflight {
    next_id: u64,
    calls: HashMap<u64, Instant>,
}

/// Tracks in-flight domain RPCs and drives the lifecycle state machine.
///
/// The in-flight registry is the only high-contention structure here; its
/// lock is scoped tightly around insert/remove and state checks, never held
/// across an RPC body.
pub struct Supervisor {
    state_tx: watch::Sender<LifecycleState>,
    count_tx: watch::Sender<usize>,
    count_rx: watch::Receiver<usize>,
    inflight: Mutex<Inflight>,
    grace: Duration,
}

impl Supervisor {
    /// Create a supervisor in [`LifecycleState::Starting`] with the given
    /// drain grace deadline.
    pub fn new(grace: Duration) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LifecycleState::Starting);
        let (count_tx, count_rx) = watch::channel(0usize);
        Arc::new(Self {
            state_tx,
            count_tx,
            count_rx,
            inflight: Mutex::new(Inflight {
                next_id: 0,
                calls: HashMap::new(),
            }),
            grace,
        })
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Number of in-flight domain RPCs.
    pub fn inflight_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// `Starting -> Serving`, on successful handshake emission.
    pub fn mark_serving(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == LifecycleState::Starting {
                *state = LifecycleState::Serving;
                true
            } else {
                false
            }
        });
        if changed {
            info!("plugin serving");
        }
    }

    /// Record the start of a domain RPC.
    ///
    /// Returns `None` once the supervisor has left `Serving`; a refused call
    /// should be answered with an unavailable-style error. The state check
    /// and the registry insert happen under one lock so a drain can never
    /// observe an empty set while a call is between "started" and
    /// "recorded".
    pub fn begin_rpc(self: &Arc<Self>) -> Option<RpcGuard> {
        let mut inner = self.lock();
        if self.state() != LifecycleState::Serving {
            return None;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.calls.insert(id, Instant::now());
        self.count_tx.send_replace(inner.calls.len());
        debug!(id, inflight = inner.calls.len(), "rpc started");
        Some(RpcGuard {
            supervisor: Arc::clone(self),
            id,
        })
    }

    /// `Serving -> Draining`, on a cooperative shutdown request. The drain
    /// itself runs asynchronously in [`Supervisor::run_drain`]; this only
    /// flips the state and returns.
    pub fn request_shutdown(&self) {
        let _inner = self.lock();
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == LifecycleState::Serving {
                *state = LifecycleState::Draining;
                true
            } else {
                false
            }
        });
        if changed {
            info!("shutdown requested, draining");
        }
    }

    /// Drive the state directly to `Terminated`, from any state. Used when
    /// no cooperative path remains: orphaning, or a lapsed drain deadline.
    pub fn force_terminate(&self) {
        let _inner = self.lock();
        let changed = self
            .state_tx
            .send_if_modified(|state| {
                if *state == LifecycleState::Terminated {
                    false
                } else {
                    *state = LifecycleState::Terminated;
                    true
                }
            });
        if changed {
            info!("terminated");
        }
    }

    /// Resolve once the in-flight set is empty.
    pub async fn drained(&self) {
        let mut rx = self.count_rx.clone();
        // The sender lives in self, so this cannot error while we do.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Resolve once the state reaches `Terminated`.
    pub async fn terminated(&self) {
        let mut rx = self.subscribe();
        let _ = rx
            .wait_for(|state| *state == LifecycleState::Terminated)
            .await;
    }

    /// Background task: wait for a drain request, then wait for the
    /// in-flight set to empty, bounded by the grace deadline. Either way the
    /// state ends at `Terminated` — if the deadline lapses with calls still
    /// outstanding, the host's own hard kill is imminent regardless.
    pub async fn run_drain(self: Arc<Self>) {
        let mut rx = self.subscribe();
        loop {
            match *rx.borrow_and_update() {
                LifecycleState::Draining => break,
                LifecycleState::Terminated => return,
                LifecycleState::Starting | LifecycleState::Serving => {}
            }
            if rx.changed().await.is_err() {
                return;
            }
        }

        let outstanding = self.inflight_count();
        if outstanding > 0 {
            info!(outstanding, "waiting for in-flight calls");
        }
        if tokio::time::timeout(self.grace, self.drained()).await.is_err() {
            warn!(
                outstanding = self.inflight_count(),
                grace_secs = self.grace.as_secs(),
                "drain deadline lapsed with calls outstanding, terminating anyway"
            );
        }
        self.force_terminate();
    }

    fn lock(&self) -> MutexGuard<'_, Inflight> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII registration of one in-flight domain RPC.
///
/// Dropping the guard, on success or failure, removes the call from the
/// in-flight set and wakes any pending drain.
pub struct RpcGuard {
    supervisor: Arc<Supervisor>,
    id: u64,
}

impl Drop for RpcGuard {
    fn drop(&mut self) {
        let mut inner = self.supervisor.lock();
        if let Some(started) = inner.calls.remove(&self.id) {
            let remaining = inner.calls.len();
            self.supervisor.count_tx.send_replace(remaining);
            debug!(
                id = self.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                inflight = remaining,
                "rpc finished"
            );
        }
    }
}

/// Watch for orphaning: if the launching parent is replaced, no shutdown
/// instruction can ever arrive through the normal channel, so terminate.
///
/// The comparison is raw parent identity, not a liveness probe: a busy
/// parent keeps its pid, a dead one causes a re-parent. Runs on its own
/// timer, decoupled from transport load.
#[cfg(unix)]
pub fn spawn_orphan_watch(
    supervisor: Arc<Supervisor>,
    poll: Duration,
) -> tokio::task::JoinHandle<()> {
    let initial = std::os::unix::process::parent_id();
    tokio::spawn(orphan_watch(
        supervisor,
        poll,
        initial,
        std::os::unix::process::parent_id,
    ))
}

async fn orphan_watch<F>(supervisor: Arc<Supervisor>, poll: Duration, initial: u32, parent: F)
where
    F: Fn() -> u32 + Send + 'static,
{
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if supervisor.state() == LifecycleState::Terminated {
            return;
        }
        let current = parent();
        if current != initial {
            warn!(initial, current, "parent process replaced, plugin is orphaned");
            supervisor.force_terminate();
            return;
        }
    }
}
