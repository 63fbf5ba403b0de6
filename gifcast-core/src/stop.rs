//! The process-wide stop source and the task spawn glue around it.
//!
//! One [`Stop`] is shared by every task in the process. Any task may
//! request stop; all tasks spawned through [`spawn`] race their work
//! against the token with a biased select, so a stop request drops the
//! task's future and with it every resource the task owns (sockets,
//! listeners, timers close on drop). Cancellation is cooperative; no
//! task is ever forcibly terminated.

use std::future::Future;

use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

// ── Stop ─────────────────────────────────────────────────────────

/// Shared handle to the single process-wide stop source.
///
/// Cloning yields another handle to the same source; requesting stop
/// twice has the same observable effect as requesting it once.
#[derive(Debug, Clone, Default)]
pub struct Stop {
    token: CancellationToken,
}

impl Stop {
    /// Create a fresh stop source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request stop. Idempotent.
    pub fn request(&self) {
        self.token.cancel();
    }

    /// Whether stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once stop has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

// ── spawn ────────────────────────────────────────────────────────

/// Spawn a detached task bound to the stop source.
///
/// The task runs on the current-thread executor's local set, so
/// futures need not be `Send` and the decoder's raw handles stay
/// usable across suspension points. When stop is requested the task future is
/// dropped at its next suspension point.
///
/// Must be called from within a `LocalSet` context.
pub fn spawn<F>(stop: &Stop, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + 'static,
{
    let stop = stop.clone();
    task::spawn_local(async move {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {}
            () = task => {}
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;
    use tokio::task::LocalSet;

    #[test]
    fn request_is_idempotent() {
        let stop = Stop::new();
        assert!(!stop.is_requested());

        stop.request();
        assert!(stop.is_requested());

        // a second request changes nothing
        stop.request();
        assert!(stop.is_requested());
    }

    #[test]
    fn clones_share_the_source() {
        let stop = Stop::new();
        let other = stop.clone();

        other.request();
        assert!(stop.is_requested());
    }

    #[tokio::test]
    async fn spawned_task_runs_to_completion() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let stop = Stop::new();
                let ran = Rc::new(Cell::new(false));

                let flag = Rc::clone(&ran);
                spawn(&stop, async move { flag.set(true) })
                    .await
                    .unwrap();

                assert!(ran.get());
                assert!(!stop.is_requested());
            })
            .await;
    }

    #[tokio::test]
    async fn stop_unwinds_a_pending_task() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let stop = Stop::new();

                let handle = spawn(&stop, async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });

                stop.request();
                // the sleeper is dropped at its suspension point
                tokio::time::timeout(Duration::from_secs(1), handle)
                    .await
                    .expect("task did not unwind on stop")
                    .unwrap();
            })
            .await;
    }
}
