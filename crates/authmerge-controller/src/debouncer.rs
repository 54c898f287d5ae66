//! Trailing-edge debouncer with serialized runs.
//!
//! A single task owns the state machine below and is the only caller of the
//! debounced function, so at most one run is ever in flight.
//!
//! ```text
//!            trigger                 quiet period elapsed
//!   Idle ───────────────► Pending ─────────────────────► Running
//!    ▲                    │  ▲  trigger resets deadline     │
//!    │                    └──┘                              │
//!    └──── no trigger during run ◄──────────────────────────┤
//!          trigger during run ──► Pending(trigger + quiet) ◄┘
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Capacity of the result channel. The caller must keep draining it.
pub const RESULT_CHANNEL_CAPACITY: usize = 10;

/// Cheap, clonable handle used to request a debounced run.
#[derive(Debug, Clone)]
pub struct DebounceHandle {
    triggers: mpsc::UnboundedSender<Instant>,
}

impl DebounceHandle {
    /// Request a run after the quiet period. Returns false once the debouncer
    /// task has stopped.
    pub fn trigger(&self) -> bool {
        self.triggers.send(Instant::now()).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending(Instant),
    Running,
}

/// Spawns the debouncer task.
pub struct Debouncer;

impl Debouncer {
    /// Start a debouncer around `f`.
    ///
    /// Every outcome of `f` is delivered on the returned receiver. Dropping
    /// all handles stops the task: a pending run is discarded, a running one
    /// completes and its outcome is still delivered.
    pub fn spawn<F, Fut, E>(
        quiet: Duration,
        f: F,
    ) -> (DebounceHandle, mpsc::Receiver<Result<(), E>>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Send + 'static,
    {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        tokio::spawn(run(quiet, f, trigger_rx, result_tx));
        (
            DebounceHandle {
                triggers: trigger_tx,
            },
            result_rx,
        )
    }
}

async fn run<F, Fut, E>(
    quiet: Duration,
    mut f: F,
    mut triggers: mpsc::UnboundedReceiver<Instant>,
    results: mpsc::Sender<Result<(), E>>,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut state = State::Idle;

    loop {
        state = match state {
            State::Idle => match triggers.recv().await {
                Some(at) => State::Pending(at + quiet),
                None => break,
            },
            State::Pending(deadline) => {
                tokio::select! {
                    trigger = triggers.recv() => match trigger {
                        Some(at) => State::Pending(at + quiet),
                        None => {
                            debug!("debouncer closed with a pending run; discarding it");
                            break;
                        }
                    },
                    () = sleep_until(deadline) => State::Running,
                }
            }
            State::Running => {
                debug!("quiet period elapsed; running debounced function");
                let outcome = f().await;
                if results.send(outcome).await.is_err() {
                    debug!("debouncer result receiver dropped; stopping");
                    break;
                }

                let mut latest = None;
                let mut closed = false;
                loop {
                    match triggers.try_recv() {
                        Ok(at) => latest = Some(at),
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            closed = true;
                            break;
                        }
                    }
                }

                match (latest, closed) {
                    (_, true) => break,
                    (Some(at), false) => State::Pending(at + quiet),
                    (None, false) => State::Idle,
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const QUIET: Duration = Duration::from_secs(1);

    fn counting() -> (
        Arc<AtomicUsize>,
        DebounceHandle,
        mpsc::Receiver<Result<(), String>>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (handle, results) = Debouncer::spawn(QUIET, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            }
        });
        (calls, handle, results)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_run() {
        let (calls, handle, mut results) = counting();

        for _ in 0..10 {
            handle.trigger();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert!(results.recv().await.unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(QUIET * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_quiet_period() {
        let (calls, handle, _results) = counting();

        handle.trigger();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handle.trigger();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_after_run_schedules_another() {
        let (calls, handle, mut results) = counting();

        handle.trigger();
        results.recv().await.unwrap().unwrap();

        handle.trigger();
        results.recv().await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_run_runs_exactly_once_more() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let (handle, mut results) = {
            let running = running.clone();
            let max_running = max_running.clone();
            let calls = calls.clone();
            Debouncer::spawn(QUIET, move || {
                let running = running.clone();
                let max_running = max_running.clone();
                let calls = calls.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            })
        };

        handle.trigger();
        tokio::time::sleep(Duration::from_secs(2)).await;
        for _ in 0..5 {
            handle.trigger();
        }

        results.recv().await.unwrap().unwrap();
        results.recv().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_delivered_and_debouncer_recovers() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let (handle, mut results) = Debouncer::spawn(QUIET, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("first run fails".to_string())
                } else {
                    Ok(())
                }
            }
        });

        handle.trigger();
        assert_eq!(
            results.recv().await.unwrap(),
            Err("first run fails".to_string())
        );

        handle.trigger();
        assert_eq!(results.recv().await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_discards_pending_run() {
        let (calls, handle, mut results) = counting();

        handle.trigger();
        drop(handle);

        assert!(results.recv().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_one_schedule() {
        let (calls, handle, mut results) = counting();
        let other = handle.clone();

        handle.trigger();
        tokio::time::sleep(Duration::from_millis(500)).await;
        other.trigger();

        results.recv().await.unwrap().unwrap();
        tokio::time::sleep(QUIET * 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
