//! Process-wide alarm clock.
//!
//! One background thread drives every periodic timeout in the process, so a
//! handler does not pay an OS thread just to poll for its timeout and timer
//! drift stays consistent across the whole wallet. Handlers reach the
//! shared clock through [`AlarmClock::create_if_necessary`]; independent
//! instances can be created for tests.

use crate::error::{EventError, EventResult};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

static SHARED: OnceCell<AlarmClock> = OnceCell::new();

/// Identifier of an armed alarm, unique while the alarm stays armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(u64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type AlarmCallback = Arc<dyn Fn(Instant) + Send + Sync>;

struct Alarm {
    id: AlarmId,
    deadline: Instant,
    /// `None` for a one-shot alarm.
    period: Option<Duration>,
    callback: AlarmCallback,
}

struct SchedulerState {
    alarms: Vec<Alarm>,
    next_id: u64,
    thread: Option<thread::JoinHandle<()>>,
    shutdown: bool,
}

struct ClockInner {
    state: Mutex<SchedulerState>,
    tick: Condvar,
}

/// Timer scheduler delivering alarm callbacks from a single thread.
///
/// Callbacks run on the scheduler thread with the scheduler's lock
/// released: they may arm or disarm alarms, and they run concurrently with
/// any handler state, so they must not block. A firing already extracted
/// when [`remove_alarm`](Self::remove_alarm) is called may still complete.
pub struct AlarmClock {
    inner: Arc<ClockInner>,
}

impl AlarmClock {
    /// Creates an unshared clock. Its scheduler thread starts with the
    /// first armed alarm, or with an explicit [`start`](Self::start).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                state: Mutex::new(SchedulerState {
                    alarms: Vec::new(),
                    next_id: 1,
                    thread: None,
                    shutdown: false,
                }),
                tick: Condvar::new(),
            }),
        }
    }

    /// Idempotently ensures the process-wide clock exists and its scheduler
    /// thread is running, and returns it.
    pub fn create_if_necessary() -> &'static AlarmClock {
        let clock = SHARED.get_or_init(AlarmClock::new);
        clock.start();
        clock
    }

    /// The process-wide clock, created on first use.
    pub fn shared() -> &'static AlarmClock {
        Self::create_if_necessary()
    }

    /// Ensures the scheduler thread is running.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = false;
        self.ensure_scheduler(&mut state);
    }

    /// Stops the scheduler thread and waits for it to exit.
    ///
    /// Armed alarms stay registered but do not fire until
    /// [`start`](Self::start) is called again. The process-wide clock is
    /// never stopped.
    pub fn stop(&self) {
        let handle = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            state.thread.take()
        };
        self.inner.tick.notify_all();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Arms an alarm that fires every `period`, starting one period from
    /// now. Returns the id used to disarm it.
    pub fn add_alarm_periodic<F>(&self, callback: F, period: Duration) -> AlarmId
    where
        F: Fn(Instant) + Send + Sync + 'static,
    {
        self.arm(Instant::now() + period, Some(period), Arc::new(callback))
    }

    /// Arms a one-shot alarm firing at `at` and then forgotten.
    pub fn add_alarm<F>(&self, callback: F, at: Instant) -> AlarmId
    where
        F: Fn(Instant) + Send + Sync + 'static,
    {
        self.arm(at, None, Arc::new(callback))
    }

    /// Disarms an alarm. Unknown ids are an ordinary error, not fatal.
    pub fn remove_alarm(&self, id: AlarmId) -> EventResult<()> {
        let mut state = self.inner.state.lock();
        let armed = state.alarms.len();
        state.alarms.retain(|alarm| alarm.id != id);
        if state.alarms.len() == armed {
            return Err(EventError::AlarmNotFound(id));
        }
        drop(state);
        self.inner.tick.notify_all();
        debug!("alarm {} disarmed", id);
        Ok(())
    }

    fn arm(&self, deadline: Instant, period: Option<Duration>, callback: AlarmCallback) -> AlarmId {
        let mut state = self.inner.state.lock();
        self.ensure_scheduler(&mut state);
        let id = AlarmId(state.next_id);
        state.next_id += 1;
        state.alarms.push(Alarm {
            id,
            deadline,
            period,
            callback,
        });
        drop(state);
        // Wake the scheduler so it re-evaluates the earliest deadline.
        self.inner.tick.notify_all();
        debug!("alarm {} armed (period {:?})", id, period);
        id
    }

    fn ensure_scheduler(&self, state: &mut SchedulerState) {
        if state.thread.is_some() || state.shutdown {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("alarm-clock".into())
            .spawn(move || Self::scheduler(inner))
            .expect("failed to spawn alarm clock thread");
        state.thread = Some(handle);
    }

    fn scheduler(inner: Arc<ClockInner>) {
        debug!("alarm clock scheduler running");
        loop {
            let mut state = inner.state.lock();
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let mut fired: Vec<(AlarmId, AlarmCallback, Instant)> = Vec::new();
            state.alarms.retain_mut(|alarm| {
                if alarm.deadline > now {
                    return true;
                }
                fired.push((alarm.id, Arc::clone(&alarm.callback), alarm.deadline));
                match alarm.period {
                    Some(period) => {
                        alarm.deadline += period;
                        if alarm.deadline <= now {
                            // The scheduler fell behind; skip to the next
                            // future deadline instead of bursting.
                            alarm.deadline = now + period;
                        }
                        true
                    }
                    None => false,
                }
            });

            if fired.is_empty() {
                match state.alarms.iter().map(|alarm| alarm.deadline).min() {
                    Some(deadline) => {
                        let _ = inner.tick.wait_until(&mut state, deadline);
                    }
                    None => inner.tick.wait(&mut state),
                }
                continue;
            }
            drop(state);

            for (id, callback, expiration) in fired {
                trace!("alarm {} expired", id);
                callback(expiration);
            }
        }
        debug!("alarm clock scheduler stopped");
    }
}

impl Default for AlarmClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AlarmClock {
    fn drop(&mut self) {
        self.stop();
    }
}
