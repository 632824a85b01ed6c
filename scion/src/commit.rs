//! Commit points for kill-safe side effects
//!
//! The host's normal shutdown mechanism is an uncatchable kill signal: the
//! supervisor cannot intervene once it is delivered, so the obligation to
//! leave on-disk or remote state either fully applied or fully unapplied
//! falls on the business logic. The [`CommitGate`] is the narrow abstraction
//! offered for that: domain code wraps every side-effecting section in a
//! gate entry, which serializes them so at most one side effect is ever
//! mid-flight at any instant.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes side-effecting sections of domain logic.
///
/// ```no_run
/// # async fn demo() {
/// let gate = scion::CommitGate::new();
/// let commit = gate.enter().await;
/// // apply exactly one side effect here
/// drop(commit);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommitGate {
    inner: Arc<Mutex<()>>,
}

impl CommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the commit point. The returned guard
    /// must be held across the whole side-effecting section and dropped as
    /// soon as the effect is fully applied.
    pub async fn enter(&self) -> CommitGuard {
        CommitGuard {
            _permit: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Non-blocking variant; `None` when another commit is mid-flight.
    pub fn try_enter(&self) -> Option<CommitGuard> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|permit| CommitGuard { _permit: permit })
    }
}

/// Exclusive access to the process's single commit point.
#[derive(Debug)]
pub struct CommitGuard {
    _permit: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_one_commit_is_mid_flight() {
        let gate = CommitGate::new();
        let held = gate.enter().await;
        assert!(gate.try_enter().is_none());
        drop(held);
        assert!(gate.try_enter().is_some());
    }

    #[tokio::test]
    async fn enter_waits_for_the_previous_commit() {
        let gate = CommitGate::new();
        let held = gate.enter().await;
        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move {
            let _commit = gate2.enter().await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap();
    }
}
