//! Periodic publisher for one writer group.
//!
//! Each running publisher owns one tokio task. Wake times lie on a fixed grid
//! `origin + n * interval` measured with the monotonic clock, so lateness of
//! one tick never shifts the following ones. A tick that overruns makes the
//! next tick fire immediately; whole slots that were missed are skipped.
//!
//! Tick work (reading the store, building and sending messages) is blocking
//! and runs on the blocking pool. Stopping cancels the loop between ticks and
//! waits a bounded grace period for an in-flight tick; a tick still running
//! after that sends nothing further.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pubsub_core::NodeHandle;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{PubSubConnection, PublishState};

/// Runtime knobs of a publisher.
#[derive(Debug, Clone)]
pub struct PublisherOptions {
    /// Lateness above which a tick is counted and logged as late.
    pub jitter_tolerance: Duration,

    /// How long stopping waits for an in-flight tick.
    pub stop_grace: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            jitter_tolerance: Duration::from_millis(40),
            stop_grace: Duration::from_secs(1),
        }
    }
}

/// Fixed-grid deadline computation.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    origin: Instant,
    interval: Duration,
    next: u64,
    missed: u64,
}

impl TickSchedule {
    /// Schedule whose first slot is `origin` itself.
    pub fn new(origin: Instant, interval: Duration) -> Self {
        Self {
            origin,
            interval: if interval.is_zero() {
                Duration::from_millis(1)
            } else {
                interval
            },
            next: 0,
            missed: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Slots skipped so far because the loop fell behind by a whole interval.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Start time of slot `n`.
    pub fn slot(&self, n: u64) -> Instant {
        let nanos = (self.interval.as_nanos() as u64).saturating_mul(n);
        self.origin + Duration::from_nanos(nanos)
    }

    /// Deadline of the next tick given the current time.
    ///
    /// Normally the next grid slot, which may already be in the past when the
    /// previous tick overran. If even the slot after that has passed, every
    /// elapsed slot but the latest is skipped and the tick is due `now`.
    pub fn next_deadline(&mut self, now: Instant) -> Instant {
        let due = self.slot(self.next);
        if now <= due + self.interval {
            self.next += 1;
            return due;
        }

        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        let latest = (elapsed / self.interval.as_nanos()) as u64;
        self.missed += latest - self.next;
        self.next = latest + 1;
        now
    }
}

/// Counters of one publisher.
#[derive(Debug, Default)]
pub struct PublisherStats {
    ticks: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    late_ticks: AtomicU64,
    missed_slots: AtomicU64,
    max_lateness_us: AtomicU64,
}

/// Point-in-time copy of [`PublisherStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublisherStatsSnapshot {
    /// Ticks that fired
    pub ticks: u64,
    /// Network messages handed to the transport
    pub published: u64,
    /// Ticks where the group could not publish
    pub skipped: u64,
    /// Ticks or sends that failed
    pub failures: u64,
    /// Ticks that woke later than the jitter tolerance
    pub late_ticks: u64,
    /// Grid slots dropped after an overrun
    pub missed_slots: u64,
    pub max_lateness: Duration,
}

impl PublisherStats {
    pub fn snapshot(&self) -> PublisherStatsSnapshot {
        PublisherStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            late_ticks: self.late_ticks.load(Ordering::Relaxed),
            missed_slots: self.missed_slots.load(Ordering::Relaxed),
            max_lateness: Duration::from_micros(self.max_lateness_us.load(Ordering::Relaxed)),
        }
    }

    /// Record a wake-up. Returns true if it was late beyond `tolerance`.
    fn record_tick(&self, lateness: Duration, tolerance: Duration) -> bool {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.max_lateness_us
            .fetch_max(lateness.as_micros() as u64, Ordering::Relaxed);
        let late = lateness > tolerance;
        if late {
            self.late_ticks.fetch_add(1, Ordering::Relaxed);
        }
        late
    }
}

/// State shared between the publisher handle and one run of its loop.
struct TickContext {
    connection: Arc<dyn PubSubConnection>,
    writer_group: NodeHandle,
    /// Owned by this run only.
    state: Mutex<PublishState>,
    stats: Arc<PublisherStats>,
    token: CancellationToken,
    /// Held while a tick decides to start and while it sends; cancelling takes it too.
    gate: Mutex<()>,
}

impl TickContext {
    /// One publishing cycle. Never fails; problems are counted and logged.
    fn run(&self) {
        {
            let _gate = self.lock_gate();
            if self.token.is_cancelled() {
                trace!(writer_group = %self.writer_group, "Publisher stopped, tick not started");
                return;
            }
            if !self.connection.can_publish(self.writer_group) {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(writer_group = %self.writer_group, "Writer group cannot publish, skipping tick");
                return;
            }
        }

        let messages = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.connection
                .create_network_messages(self.writer_group, &mut state)
        };
        let messages = match messages {
            Ok(messages) => messages,
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                error!(writer_group = %self.writer_group, "Failed to build network messages: {}", e);
                return;
            }
        };

        for message in &messages {
            let _gate = self.lock_gate();
            if self.token.is_cancelled() {
                debug!(writer_group = %self.writer_group, "Publisher stopped, dropping remaining messages");
                return;
            }
            match self.connection.publish_network_message(message) {
                Ok(()) => {
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    error!(writer_group = %self.writer_group, "Failed to publish network message: {}", e);
                }
            }
        }
    }

    /// Cancel the run. Once this returns no tick starts and nothing is sent.
    fn cancel(&self) {
        let _gate = self.lock_gate();
        self.token.cancel();
    }

    fn lock_gate(&self) -> std::sync::MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RunningLoop {
    context: Arc<TickContext>,
    task: JoinHandle<()>,
}

/// Periodic publisher of one writer group on one connection.
pub struct Publisher {
    connection: Arc<dyn PubSubConnection>,
    writer_group: NodeHandle,
    interval: Duration,
    options: PublisherOptions,
    stats: Arc<PublisherStats>,
    runtime: Handle,
    running: Mutex<Option<RunningLoop>>,
}

impl Publisher {
    /// Create an idle publisher bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn new(
        connection: Arc<dyn PubSubConnection>,
        writer_group: NodeHandle,
        interval: Duration,
        options: PublisherOptions,
    ) -> Self {
        Self::with_runtime(Handle::current(), connection, writer_group, interval, options)
    }

    /// Create an idle publisher whose loop runs on `runtime`.
    pub fn with_runtime(
        runtime: Handle,
        connection: Arc<dyn PubSubConnection>,
        writer_group: NodeHandle,
        interval: Duration,
        options: PublisherOptions,
    ) -> Self {
        Self {
            connection,
            writer_group,
            interval,
            options,
            stats: Arc::new(PublisherStats::default()),
            runtime,
            running: Mutex::new(None),
        }
    }

    pub fn writer_group(&self) -> NodeHandle {
        self.writer_group
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> PublisherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether a publishing loop is active.
    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Start the publishing loop. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let mut running = self.lock_running();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!(writer_group = %self.writer_group, "Publisher already running");
            return false;
        }

        // Every run begins with key frames again.
        let context = Arc::new(TickContext {
            connection: self.connection.clone(),
            writer_group: self.writer_group,
            state: Mutex::new(PublishState::new()),
            stats: self.stats.clone(),
            token: CancellationToken::new(),
            gate: Mutex::new(()),
        });
        let task = self.runtime.spawn(run_loop(
            context.clone(),
            self.interval,
            self.options.clone(),
        ));
        *running = Some(RunningLoop { context, task });

        info!(
            writer_group = %self.writer_group,
            interval_ms = self.interval.as_secs_f64() * 1000.0,
            "Publisher started"
        );
        true
    }

    /// Cancel the loop without waiting for it.
    ///
    /// Callable from synchronous code. No tick starts after this returns and
    /// an in-flight tick sends no further messages.
    pub fn request_stop(&self) -> bool {
        match self.take_running() {
            Some(running) => {
                running.context.cancel();
                info!(writer_group = %self.writer_group, "Publisher stop requested");
                true
            }
            None => false,
        }
    }

    /// Cancel the loop and wait (bounded) until it has exited.
    pub async fn stop(&self) -> bool {
        let Some(mut running) = self.take_running() else {
            return false;
        };
        running.context.cancel();

        // The loop itself waits `stop_grace` for an in-flight tick.
        let bound = self.options.stop_grace + Duration::from_millis(100);
        if timeout(bound, &mut running.task).await.is_err() {
            warn!(writer_group = %self.writer_group, "Publisher loop did not exit in time, aborting");
            running.task.abort();
        }
        info!(writer_group = %self.writer_group, "Publisher stopped");
        true
    }

    fn take_running(&self) -> Option<RunningLoop> {
        self.lock_running().take()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if let Some(running) = self.lock_running().take() {
            running.context.cancel();
        }
    }
}

async fn run_loop(context: Arc<TickContext>, interval: Duration, options: PublisherOptions) {
    let token = context.token.clone();
    let mut schedule = TickSchedule::new(Instant::now(), interval);

    loop {
        let deadline = schedule.next_deadline(Instant::now());
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = sleep_until(deadline) => {}
        }
        if token.is_cancelled() {
            break;
        }

        let lateness = Instant::now().saturating_duration_since(deadline);
        if context.stats.record_tick(lateness, options.jitter_tolerance) {
            warn!(
                writer_group = %context.writer_group,
                lateness_ms = lateness.as_secs_f64() * 1000.0,
                "Publishing tick late"
            );
        }
        context
            .stats
            .missed_slots
            .store(schedule.missed(), Ordering::Relaxed);

        let tick = context.clone();
        let mut work = tokio::task::spawn_blocking(move || tick.run());
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                if timeout(options.stop_grace, &mut work).await.is_err() {
                    warn!(writer_group = %context.writer_group, "Tick still running after stop grace period");
                }
                break;
            }
            result = &mut work => {
                if let Err(e) = result {
                    context.stats.failures.fetch_add(1, Ordering::Relaxed);
                    error!(writer_group = %context.writer_group, "Publishing tick panicked: {}", e);
                }
            }
        }
    }

    debug!(writer_group = %context.writer_group, "Publisher loop exited");
}
