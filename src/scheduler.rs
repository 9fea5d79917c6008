use crate::error::{SessionError, SessionResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest period a timer runs at; zero periods are raised to this
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Work run on every tick of a repeating timer
pub type TickFn = Box<dyn FnMut() + Send + 'static>;

/// Repeating-timer capability injected into the periodic producers
pub trait Scheduler: Send + Sync {
    /// Arm a timer that first fires one `period` from now, then every `period`.
    fn schedule_repeating(&self, name: &'static str, period: Duration, task: TickFn) -> TimerHandle;
}

/// Armed timer. Dropping or cancelling it disarms the timer.
pub struct TimerHandle {
    name: &'static str,
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    fn new(name: &'static str, cancelled: Arc<AtomicBool>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            name,
            cancelled,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Disarm the timer. A tick already executing finishes; no further ticks run.
    pub fn cancel(&mut self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::debug!("[timer] {} disarmed", self.name);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Timers backed by `tokio::time::interval` on a runtime
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler for the runtime the caller is running inside
    pub fn current() -> SessionResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SessionError::Internal(format!("No tokio runtime: {}", e)))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, name: &'static str, period: Duration, mut task: TickFn) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        if period < MIN_PERIOD {
            log::warn!("[timer] {} period {:?} too short, using {:?}", name, period, MIN_PERIOD);
        }
        let period = period.max(MIN_PERIOD);

        let join = self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                task();
            }
        });

        log::debug!("[timer] {} armed every {:?}", name, period);
        TimerHandle::new(name, cancelled, Some(join))
    }
}

struct ManualTimer {
    period: Duration,
    next_due: Duration,
    cancelled: Arc<AtomicBool>,
    task: TickFn,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    timers: Vec<ManualTimer>,
}

/// Scheduler whose time only moves through [`ManualScheduler::advance`].
/// Ticks run synchronously on the caller's thread.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward, firing every tick that falls due in order.
    /// Returns the number of ticks fired.
    pub fn advance(&self, by: Duration) -> usize {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let target = state.now + by;
        let mut fired = 0;

        loop {
            state.timers.retain(|t| !t.cancelled.load(Ordering::SeqCst));

            let next = state
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.next_due <= target)
                .min_by_key(|(_, t)| t.next_due)
                .map(|(idx, _)| idx);

            let Some(idx) = next else { break };

            let due = state.timers[idx].next_due;
            state.now = due;
            let timer = &mut state.timers[idx];
            timer.next_due += timer.period;
            (timer.task)();
            fired += 1;
        }

        state.now = target;
        fired
    }

    /// Number of timers still armed
    pub fn armed(&self) -> usize {
        self.state
            .lock()
            .map(|s| {
                s.timers
                    .iter()
                    .filter(|t| !t.cancelled.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, name: &'static str, period: Duration, task: TickFn) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let period = period.max(MIN_PERIOD);

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next_due = state.now + period;
        state.timers.push(ManualTimer {
            period,
            next_due,
            cancelled: Arc::clone(&cancelled),
            task,
        });

        TimerHandle::new(name, cancelled, None)
    }
}
