//! FIFO RUN/WAIT task queue with named lanes and pump-driven timers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::clock::Clock;

/// Lane used by all the default-lane operations.
pub const DEFAULT_LANE: &str = "";

/// Owned zero-argument callback held by a RUN task.
pub type RunFn = Box<dyn FnOnce() + Send + 'static>;

/// One scheduler unit. Immutable once enqueued, consumed exactly once.
pub enum Task {
    /// Invoke the callback synchronously when the task reaches the head.
    Run(RunFn),
    /// Park the lane for the given number of milliseconds.
    Wait(u64),
}

#[derive(Default)]
struct Lane {
    queue: VecDeque<Task>,
    /// True while a RUN callback from this lane is executing.
    busy: bool,
    /// Absolute deadline of an in-flight WAIT.
    parked_until: Option<u64>,
}

impl Lane {
    fn settled(&self) -> bool {
        !self.busy && self.parked_until.is_none() && self.queue.is_empty()
    }
}

enum NextStep {
    Run { lane: String, task: RunFn },
    Idle,
}

/// Ordered lanes of [`Task`]s executed strictly in enqueue order.
///
/// A WAIT task blocks all subsequent tasks in its lane (and only its lane)
/// until the deadline passes. Queue depth is unbounded; callers pacing
/// untrusted input are expected to bound it themselves.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    lanes: BTreeMap<String, Lane>,
    active: bool,
    auto_start: bool,
}

impl Scheduler {
    /// Creates an auto-starting scheduler: enqueueing onto an idle instance
    /// begins draining immediately.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_auto_start(clock, true)
    }

    pub fn with_auto_start(clock: Arc<dyn Clock>, auto_start: bool) -> Self {
        Self {
            clock,
            lanes: BTreeMap::new(),
            active: false,
            auto_start,
        }
    }

    pub fn enqueue_run(&mut self, f: impl FnOnce() + Send + 'static) {
        self.enqueue_run_in(DEFAULT_LANE, f);
    }

    pub fn enqueue_wait(&mut self, duration_ms: u64) {
        self.enqueue_wait_in(DEFAULT_LANE, duration_ms);
    }

    pub fn enqueue_run_in(&mut self, lane: &str, f: impl FnOnce() + Send + 'static) {
        self.lane_mut(lane).queue.push_back(Task::Run(Box::new(f)));
        if self.auto_start {
            self.active = true;
        }
    }

    pub fn enqueue_wait_in(&mut self, lane: &str, duration_ms: u64) {
        self.lane_mut(lane).queue.push_back(Task::Wait(duration_ms));
        if self.auto_start {
            self.active = true;
        }
    }

    /// Idempotent: starting an active scheduler is a no-op.
    pub fn start(&mut self) {
        self.active = true;
    }

    /// Idempotent: halts draining after the in-flight task completes.
    /// Pending tasks stay queued for a future [`Scheduler::start`].
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Discards pending tasks in the default lane. An in-flight task
    /// (RUN executing or WAIT already parked) is unaffected.
    pub fn clear(&mut self) {
        self.clear_lane(DEFAULT_LANE);
    }

    pub fn clear_lane(&mut self, lane: &str) {
        if let Some(lane) = self.lanes.get_mut(lane) {
            lane.queue.clear();
        }
    }

    pub fn clear_all(&mut self) {
        for lane in self.lanes.values_mut() {
            lane.queue.clear();
        }
    }

    /// Pops the next RUN callback from `lane`, discarding any WAIT tasks
    /// encountered before it. Returns `None` if no RUN task remains.
    pub fn next_runnable(&mut self, lane: &str) -> Option<RunFn> {
        let lane = self.lanes.get_mut(lane)?;
        while let Some(task) = lane.queue.pop_front() {
            if let Task::Run(f) = task {
                return Some(f);
            }
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_auto_start(&mut self, auto_start: bool) {
        self.auto_start = auto_start;
    }

    /// Number of tasks still queued in `lane` (not counting one in flight).
    pub fn pending(&self, lane: &str) -> usize {
        self.lanes.get(lane).map_or(0, |l| l.queue.len())
    }

    /// Earliest WAIT deadline across all parked lanes.
    pub fn next_deadline(&self) -> Option<u64> {
        self.lanes.values().filter_map(|l| l.parked_until).min()
    }

    fn lane_mut(&mut self, lane: &str) -> &mut Lane {
        self.lanes.entry(lane.to_string()).or_default()
    }

    /// Picks the next due RUN task, marking its lane busy. Elapses due WAIT
    /// tasks on the way. Deactivates once every lane has settled.
    fn next_step(&mut self) -> NextStep {
        if !self.active {
            return NextStep::Idle;
        }
        let now = self.clock.now_ms();

        for (name, lane) in self.lanes.iter_mut() {
            if lane.busy {
                continue;
            }
            if let Some(until) = lane.parked_until {
                if now < until {
                    continue;
                }
                lane.parked_until = None;
            }
            loop {
                match lane.queue.pop_front() {
                    Some(Task::Run(f)) => {
                        lane.busy = true;
                        return NextStep::Run {
                            lane: name.clone(),
                            task: f,
                        };
                    }
                    Some(Task::Wait(ms)) => {
                        let until = now.saturating_add(ms);
                        if now < until {
                            trace!(lane = %name, until, "lane parked");
                            lane.parked_until = Some(until);
                            break;
                        }
                        // zero-length wait elapses in place
                    }
                    None => break,
                }
            }
        }

        if self.lanes.values().all(Lane::settled) {
            self.active = false;
        }
        NextStep::Idle
    }

    fn finish_run(&mut self, lane: &str) {
        if let Some(lane) = self.lanes.get_mut(lane) {
            lane.busy = false;
        }
    }
}

/// Shared handle driving a [`Scheduler`].
///
/// The drain loop never holds the scheduler lock while a RUN callback
/// executes, so callbacks are free to enqueue further tasks or pump again;
/// a re-entrant pump observes the busy lane and returns immediately, which
/// is what keeps at most one task in flight per lane.
#[derive(Clone)]
pub struct Pacer {
    inner: Arc<Mutex<Scheduler>>,
}

impl Pacer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_auto_start(clock, true)
    }

    pub fn with_auto_start(clock: Arc<dyn Clock>, auto_start: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Scheduler::with_auto_start(clock, auto_start))),
        }
    }

    pub fn enqueue_run(&self, f: impl FnOnce() + Send + 'static) {
        self.enqueue_run_in(DEFAULT_LANE, f);
    }

    pub fn enqueue_wait(&self, duration_ms: u64) {
        self.enqueue_wait_in(DEFAULT_LANE, duration_ms);
    }

    pub fn enqueue_run_in(&self, lane: &str, f: impl FnOnce() + Send + 'static) {
        self.inner.lock().enqueue_run_in(lane, f);
        self.pump();
    }

    pub fn enqueue_wait_in(&self, lane: &str, duration_ms: u64) {
        self.inner.lock().enqueue_wait_in(lane, duration_ms);
        self.pump();
    }

    pub fn start(&self) {
        self.inner.lock().start();
        self.pump();
    }

    pub fn stop(&self) {
        self.inner.lock().stop();
    }

    /// Stops draining and invokes `on_stopped` synchronously.
    pub fn stop_with(&self, on_stopped: impl FnOnce()) {
        self.inner.lock().stop();
        on_stopped();
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn clear_all(&self) {
        self.inner.lock().clear_all();
    }

    pub fn set_auto_start(&self, auto_start: bool) {
        self.inner.lock().set_auto_start(auto_start);
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active()
    }

    pub fn pending(&self, lane: &str) -> usize {
        self.inner.lock().pending(lane)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.lock().next_deadline()
    }

    pub fn next_runnable(&self, lane: &str) -> Option<RunFn> {
        self.inner.lock().next_runnable(lane)
    }

    /// Executes every due task. Returns once all lanes are busy, parked on a
    /// future deadline, drained, or the scheduler is stopped.
    pub fn pump(&self) {
        loop {
            let step = self.inner.lock().next_step();
            match step {
                NextStep::Run { lane, task } => {
                    task();
                    self.inner.lock().finish_run(&lane);
                }
                NextStep::Idle => break,
            }
        }
    }
}
