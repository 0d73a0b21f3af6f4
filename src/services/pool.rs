use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

/// Width of the sliding rate window. A request timestamp stops counting
/// against the budget exactly this long after it was recorded.
const RATE_WINDOW: Duration = Duration::from_millis(60_000);

/// Point-in-time pool snapshot, not locked against concurrent mutation.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub active_requests: usize,
    pub queued_requests: usize,
    pub requests_in_last_minute: usize,
    pub max_concurrency: usize,
    pub requests_per_minute: usize,
}

struct PoolState {
    waiters: VecDeque<oneshot::Sender<()>>,
    active: usize,
    started: VecDeque<Instant>,
    max_concurrency: usize,
    requests_per_minute: usize,
    draining: bool,
}

impl PoolState {
    fn prune_window(&mut self, now: Instant) {
        while let Some(&oldest) = self.started.front() {
            if now.duration_since(oldest) >= RATE_WINDOW {
                self.started.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Admission gate for calls to the rate-limited vision-language model API.
///
/// Bounds in-flight calls at `max_concurrency` and call starts at
/// `requests_per_minute` per trailing 60 seconds. Submitted tasks wait in
/// FIFO order; a single drain task hands out start permits and suspends
/// (timer-driven, no busy loop) while the rate window is exhausted.
///
/// The pool never retries and never swallows a task's failure; whatever
/// the task returns goes back to the submitting caller unchanged. Cloning
/// yields another handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    state: Arc<Mutex<PoolState>>,
}

impl ConnectionPool {
    pub fn new(max_concurrency: usize, requests_per_minute: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                waiters: VecDeque::new(),
                active: 0,
                started: VecDeque::new(),
                max_concurrency,
                requests_per_minute,
                draining: false,
            })),
        }
    }

    /// Run `task` once both the concurrency and rate budgets admit it.
    /// Tasks start in submission order.
    pub async fn execute<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (permit_tx, permit_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().unwrap();
            state.waiters.push_back(permit_tx);
        }
        schedule_drain(&self.state);

        // The drain task never drops a waiter without sending; Err would
        // mean the pool itself was dropped, impossible while we hold a
        // handle to it.
        let _ = permit_rx.await;

        // Returns the concurrency slot even if the caller's future is
        // dropped mid-task.
        let _slot = SlotGuard {
            state: Arc::clone(&self.state),
        };
        task().await
    }

    /// Change the limits in place. Queued and in-flight work is untouched;
    /// the new limits apply to the next admission decision.
    pub fn update_config(&self, max_concurrency: usize, requests_per_minute: usize) {
        {
            let mut state = self.state.lock().unwrap();
            state.max_concurrency = max_concurrency;
            state.requests_per_minute = requests_per_minute;
        }
        schedule_drain(&self.state);
    }

    pub fn get_stats(&self) -> PoolStats {
        let mut state = self.state.lock().unwrap();
        state.prune_window(Instant::now());
        PoolStats {
            active_requests: state.active,
            queued_requests: state.waiters.len(),
            requests_in_last_minute: state.started.len(),
            max_concurrency: state.max_concurrency,
            requests_per_minute: state.requests_per_minute,
        }
    }
}

/// Spawn the drain task unless one is already active.
fn schedule_drain(state: &Arc<Mutex<PoolState>>) {
    {
        let mut state = state.lock().unwrap();
        if state.draining {
            return;
        }
        state.draining = true;
    }
    tokio::spawn(drain(Arc::clone(state)));
}

async fn drain(shared: Arc<Mutex<PoolState>>) {
    loop {
        let wake_at = {
            let mut state = shared.lock().unwrap();
            let now = Instant::now();
            state.prune_window(now);

            if state.waiters.is_empty() || state.active >= state.max_concurrency {
                state.draining = false;
                return;
            }

            if state.started.len() >= state.requests_per_minute {
                // Window is non-empty here since requests_per_minute >= 1.
                let oldest = state.started.front().copied().unwrap_or(now);
                Some(oldest + RATE_WINDOW)
            } else {
                if let Some(waiter) = state.waiters.pop_front() {
                    // A failed send means the caller gave up while queued;
                    // its budget was never spent.
                    if waiter.send(()).is_ok() {
                        state.active += 1;
                        state.started.push_back(now);
                    }
                }
                None
            }
        };

        if let Some(at) = wake_at {
            tokio::time::sleep_until(at).await;
        }
    }
}

struct SlotGuard {
    state: Arc<Mutex<PoolState>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock().unwrap();
            state.active -= 1;
        }
        schedule_drain(&self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::sleep;

    /// Tracks the peak number of concurrently running tasks.
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyProbe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_concurrency() {
        let pool = ConnectionPool::new(2, 100);
        let probe = ConcurrencyProbe::new();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let probe = Arc::clone(&probe);
            handles.push(tokio::spawn(async move {
                pool.execute(|| async {
                    probe.enter();
                    sleep(Duration::from_millis(100)).await;
                    probe.exit();
                })
                .await;
            }));
        }
        futures::future::join_all(handles).await;

        assert_eq!(probe.peak(), 2);
        let stats = pool.get_stats();
        assert_eq!(stats.active_requests, 0);
        assert_eq!(stats.queued_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_delays_excess_starts() {
        let pool = ConnectionPool::new(10, 3);
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pool = pool.clone();
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                pool.execute(|| async {
                    starts.lock().unwrap().push(Instant::now());
                })
                .await;
            }));
            tokio::task::yield_now().await;
        }
        futures::future::join_all(handles).await;

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 5);
        // First three fit the window; the fourth waits for the oldest
        // timestamp to expire.
        assert!(starts[2] - starts[0] < RATE_WINDOW);
        assert!(starts[3] - starts[0] >= RATE_WINDOW);
        assert!(starts[4] - starts[1] >= RATE_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn six_tasks_two_wide_five_per_minute() {
        let pool = ConnectionPool::new(2, 5);
        let probe = ConcurrencyProbe::new();
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let begin = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let probe = Arc::clone(&probe);
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                pool.execute(|| async {
                    starts.lock().unwrap().push(Instant::now());
                    probe.enter();
                    sleep(Duration::from_millis(100)).await;
                    probe.exit();
                })
                .await;
            }));
            tokio::task::yield_now().await;
        }
        futures::future::join_all(handles).await;

        assert_eq!(probe.peak(), 2);
        let starts = starts.lock().unwrap();
        // Starts 1-5 fit in the first window; the sixth waits out the rate
        // budget even though a concurrency slot is free.
        assert!(starts[4] - begin < RATE_WINDOW);
        assert!(starts[5] - starts[0] >= RATE_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_order_is_preserved() {
        let pool = ConnectionPool::new(1, 100);
        let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());

        // Head task blocks the single slot so the rest pile up in order.
        let head = {
            let pool = pool.clone();
            let gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                pool.execute(|| async {
                    order.lock().unwrap().push(0);
                    gate.notified().await;
                })
                .await;
            })
        };
        tokio::task::yield_now().await;

        let mut handles = vec![head];
        for i in 1..=5 {
            let pool = pool.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                pool.execute(|| async {
                    order.lock().unwrap().push(i);
                })
                .await;
            }));
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.get_stats().queued_requests, 5);
        gate.notify_one();
        futures::future::join_all(handles).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn update_config_applies_to_next_admission() {
        let pool = ConnectionPool::new(1, 100);

        let run_batch = |pool: ConnectionPool| async move {
            let probe = ConcurrencyProbe::new();
            let mut handles = Vec::new();
            for _ in 0..3 {
                let pool = pool.clone();
                let probe = Arc::clone(&probe);
                handles.push(tokio::spawn(async move {
                    pool.execute(|| async {
                        probe.enter();
                        sleep(Duration::from_millis(50)).await;
                        probe.exit();
                    })
                    .await;
                }));
            }
            futures::future::join_all(handles).await;
            probe.peak()
        };

        assert_eq!(run_batch(pool.clone()).await, 1);

        pool.update_config(3, 100);
        assert_eq!(pool.get_stats().max_concurrency, 3);

        assert_eq!(run_batch(pool.clone()).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn task_failure_propagates_and_frees_the_slot() {
        let pool = ConnectionPool::new(1, 100);

        let result: Result<(), String> =
            pool.execute(|| async { Err("model timeout".into()) }).await;
        assert_eq!(result.unwrap_err(), "model timeout");

        let stats = pool.get_stats();
        assert_eq!(stats.active_requests, 0);

        // The slot is free again for the next task.
        let result: Result<u32, String> = pool.execute(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
