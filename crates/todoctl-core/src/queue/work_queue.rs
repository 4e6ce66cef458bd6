//! Deduplicating work queue with delayed re-enqueue.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{DelayedEntry, KeyState, QueueCounts, RetryPolicy};
use crate::domain::ObjectKey;

/// In-memory queue state.
///
/// A key is in `dirty` whenever an immediate reconciliation is owed. It is
/// in `ready` only when it is dirty and not in `processing`, so one key is
/// never handed to two workers at once.
#[derive(Default)]
struct QueueState {
    /// Ready queue (FIFO).
    ready: VecDeque<ObjectKey>,

    /// Keys owed an immediate reconciliation.
    dirty: HashSet<ObjectKey>,

    /// Keys currently held by a worker.
    processing: HashSet<ObjectKey>,

    /// Delayed entries; may contain stale entries superseded in `waiting`.
    delayed: BinaryHeap<DelayedEntry>,

    /// Earliest live not-before per delayed key.
    waiting: HashMap<ObjectKey, Instant>,

    /// Consecutive failures per key.
    failures: HashMap<ObjectKey, u32>,

    next_seq: u64,
}

impl QueueState {
    /// Returns true if the key became newly eligible for a worker.
    fn mark_dirty(&mut self, key: ObjectKey) -> bool {
        if !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            // done() will move it to ready
            return false;
        }
        self.ready.push_back(key);
        true
    }

    /// Move delayed entries whose time has come into the ready queue.
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek() {
            if !entry.is_due(now) {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.delayed.pop() else {
                break;
            };
            // Skip entries superseded by an earlier deadline
            if self.waiting.get(&entry.key) != Some(&entry.not_before) {
                continue;
            }
            self.waiting.remove(&entry.key);
            self.mark_dirty(entry.key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|entry| entry.not_before)
    }

    fn state_of(&self, key: &ObjectKey) -> Option<KeyState> {
        match (
            self.processing.contains(key),
            self.dirty.contains(key),
            self.waiting.contains_key(key),
        ) {
            (true, true, _) => Some(KeyState::InFlightDirty),
            (true, false, _) => Some(KeyState::InFlight),
            (false, true, _) => Some(KeyState::Queued),
            (false, false, true) => Some(KeyState::Delayed),
            (false, false, false) => None,
        }
    }
}

/// Work queue of reconcile keys.
///
/// # 保証
/// - at most one pending immediate entry per key
/// - at most one worker holds a key at any time
/// - a key re-added while held is handed out again right after `done`
/// - `add_after` never postpones work that is already due
///
/// Shared between the router and the workers as `Arc<WorkQueue>`.
pub struct WorkQueue {
    state: Mutex<QueueState>,

    /// Wakes workers blocked in `get`.
    notify: Notify,

    /// Wakes `wait_idle` callers when the last in-flight key completes.
    idle: Notify,

    /// Set once by `shut_down`; readable without the state lock.
    shutting_down: AtomicBool,

    retry_policy: RetryPolicy,
}

/// Far enough to never fire, near enough not to overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl WorkQueue {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            idle: Notify::new(),
            shutting_down: AtomicBool::new(false),
            retry_policy,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Insert `key` for immediate processing.
    ///
    /// No-op if the key is already pending or the queue is shutting down.
    /// Returns whether the key was accepted as new work.
    pub async fn add(&self, key: ObjectKey) -> bool {
        let (accepted, wake) = {
            let mut state = self.state.lock().await;
            if self.is_shutting_down() || state.dirty.contains(&key) {
                (false, false)
            } else {
                let wake = state.mark_dirty(key);
                (true, wake)
            }
        };
        if wake {
            self.notify.notify_one();
        }
        accepted
    }

    /// Insert `key` to become eligible no earlier than `now + delay`.
    ///
    /// An already pending immediate entry wins; between two delayed entries
    /// the earlier deadline wins.
    pub async fn add_after(&self, key: ObjectKey, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.add(key).await;
        }
        let now = Instant::now();
        let not_before = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let scheduled = {
            let mut state = self.state.lock().await;
            if self.is_shutting_down() || state.dirty.contains(&key) {
                false
            } else if state
                .waiting
                .get(&key)
                .is_some_and(|existing| *existing <= not_before)
            {
                false
            } else {
                let attempts = state.failures.get(&key).copied().unwrap_or(0);
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiting.insert(key.clone(), not_before);
                state.delayed.push(DelayedEntry {
                    key,
                    not_before,
                    attempts,
                    seq,
                });
                true
            }
        };
        if scheduled {
            // sleepers must recompute their next wake-up
            self.notify.notify_waiters();
        }
        scheduled
    }

    /// Record a failure and re-add with backoff. Returns the attempt count.
    pub async fn add_rate_limited(&self, key: ObjectKey) -> u32 {
        let attempts = self.record_failure(&key).await;
        let delay = self.retry_policy.next_delay(attempts);
        self.add_after(key, delay).await;
        attempts
    }

    /// Record a failure and re-add immediately. Returns the attempt count.
    pub async fn add_retry_now(&self, key: ObjectKey) -> u32 {
        let attempts = self.record_failure(&key).await;
        self.add(key).await;
        attempts
    }

    async fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut state = self.state.lock().await;
        let attempts = state.failures.entry(key.clone()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        *attempts
    }

    /// Wait for an eligible key and mark it in flight.
    ///
    /// Returns `None` once the queue is shutting down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            // enable() before checking state so a wake-up between the check
            // and the await is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.state.lock().await;
                if self.is_shutting_down() {
                    return None;
                }
                state.promote_due(Instant::now());

                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more_ready = !state.ready.is_empty();
                    drop(state);
                    // promotion may have readied more than this worker takes
                    if more_ready {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                state.next_deadline()
            };

            match next_wake {
                Some(wake_time) => {
                    tokio::select! {
                        _ = notified.as_mut() => {},
                        _ = tokio::time::sleep_until(wake_time) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark `key` no longer in flight.
    ///
    /// If the key was re-added meanwhile it becomes eligible now.
    pub async fn done(&self, key: &ObjectKey) {
        let (wake, idle) = {
            let mut state = self.state.lock().await;
            state.processing.remove(key);
            let wake = if state.dirty.contains(key) && !self.is_shutting_down() {
                state.ready.push_back(key.clone());
                true
            } else {
                false
            };
            (wake, state.processing.is_empty())
        };
        if wake {
            self.notify.notify_one();
        }
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Clear the failure count for `key`.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn num_requeues(&self, key: &ObjectKey) -> u32 {
        let state = self.state.lock().await;
        state.failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys eligible right now.
    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn state_of(&self, key: &ObjectKey) -> Option<KeyState> {
        self.state.lock().await.state_of(key)
    }

    /// Not-before time of the live delayed entry for `key`, if any.
    pub async fn not_before(&self, key: &ObjectKey) -> Option<Instant> {
        self.state.lock().await.waiting.get(key).copied()
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        QueueCounts {
            ready: state.ready.len(),
            delayed: state.waiting.len(),
            in_flight: state.processing.len(),
            failing: state.failures.len(),
        }
    }

    /// Stop accepting work and release every blocked `get`.
    ///
    /// In-flight keys are unaffected; pair with `wait_idle` to drain them.
    pub fn shut_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Resolve once no key is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().await.processing.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
