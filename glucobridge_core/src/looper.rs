//! Looper: a cancellable polling scheduler that threads state across cycles.
//!
//! Each iteration awaits the step, then sleeps whatever is left of the
//! interval (nothing if the step overran it). Iterations never overlap.
//!
//! A failed step is logged and the loop carries on with the state it had
//! before that step, so the next cycle retries the same window.
//!
//! Stopping is cooperative: a running step always completes; a stop request
//! only ends the loop at the next iteration boundary (cutting the sleep
//! short).

use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cloneable handle used to ask one or more loops to stop
#[derive(Clone, Debug)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request termination at the next iteration boundary
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Final state and counters of a stopped loop
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome<S> {
    pub state: S,
    pub iterations: u64,
    pub failures: u64,
}

/// Sequential polling loop over a step function `S -> Future<Result<S>>`
pub struct Looper<F> {
    label: String,
    interval: Duration,
    step: F,
    stop: StopHandle,
}

impl<F> Looper<F> {
    pub fn new(label: impl Into<String>, interval: Duration, step: F) -> Self {
        Self {
            label: label.into(),
            interval,
            step,
            stop: StopHandle::new(),
        }
    }

    /// Share an existing stop handle, e.g. to stop several loops at once
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run until stopped, starting from `initial`
    pub async fn run<S, Fut>(mut self, initial: S) -> LoopOutcome<S>
    where
        S: Clone,
        F: FnMut(S) -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let mut stop_rx = self.stop.subscribe();
        let mut state = initial;
        let mut iterations = 0u64;
        let mut failures = 0u64;

        tracing::info!(
            loop = %self.label,
            interval_secs = self.interval.as_secs_f64(),
            "Starting loop"
        );

        while !*stop_rx.borrow() {
            let started = Instant::now();
            iterations += 1;

            match (self.step)(state.clone()).await {
                Ok(next) => state = next,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        loop = %self.label,
                        iteration = iterations,
                        error = %e,
                        "Cycle failed, keeping previous state"
                    );
                }
            }

            let wait = self.interval.saturating_sub(started.elapsed());
            tracing::debug!(loop = %self.label, wait_ms = wait.as_millis() as u64, "Cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.changed() => {}
            }
        }

        tracing::info!(
            loop = %self.label,
            iterations,
            failures,
            "Loop stopped"
        );

        LoopOutcome {
            state,
            iterations,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_threads_state_between_iterations() {
        let stop = StopHandle::new();
        let handle = stop.clone();
        let looper = Looper::new("count", Duration::from_millis(1), move |n: u32| {
            let handle = handle.clone();
            async move {
                if n + 1 == 3 {
                    handle.stop();
                }
                Ok::<_, Error>(n + 1)
            }
        })
        .with_stop_handle(stop);

        let outcome = looper.run(0).await;

        assert_eq!(outcome.state, 3);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.failures, 0);
    }

    #[tokio::test]
    async fn test_failed_step_keeps_previous_state() {
        let stop = StopHandle::new();
        let handle = stop.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let looper = Looper::new("flaky", Duration::from_millis(1), move |n: u32| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let handle = handle.clone();
            async move {
                if call == 3 {
                    handle.stop();
                }
                if call == 2 {
                    return Err(Error::Transport("sink unavailable".into()));
                }
                Ok(n + 10)
            }
        })
        .with_stop_handle(stop);

        let outcome = looper.run(0).await;

        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.state, 20);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stop_cuts_sleep_short() {
        let looper = Looper::new("slow", Duration::from_secs(60), |n: u32| async move {
            Ok::<_, Error>(n + 1)
        });
        let stop = looper.stop_handle();

        let task = tokio::spawn(looper.run(0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.stop();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop should stop promptly")
            .unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.state, 1);
    }

    #[tokio::test]
    async fn test_in_flight_step_runs_to_completion() {
        let looper = Looper::new("busy", Duration::from_millis(1), |n: u32| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Error>(n + 1)
        });
        let stop = looper.stop_handle();

        let task = tokio::spawn(looper.run(0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.stop();

        let outcome = task.await.unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.state, 1);
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_before_start_runs_nothing() {
        let looper = Looper::new("idle", Duration::from_millis(1), |n: u32| async move {
            Ok::<_, Error>(n + 1)
        });
        looper.stop_handle().stop();

        let outcome = looper.run(7).await;
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.state, 7);
    }
}
