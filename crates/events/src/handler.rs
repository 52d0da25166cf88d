//! Per-subsystem event handler: one queue, one worker thread.
//!
//! A handler serializes all work for its subsystem: collaborators signal
//! typed events from any thread, and a dedicated worker dequeues and
//! dispatches them one at a time. A handler with a registered timeout
//! dispatcher additionally arms a periodic alarm on the process-wide
//! [`AlarmClock`]; each firing synthesizes a [`TimeoutEvent`] and pushes it
//! out-of-band into the same queue, so timer-driven work is serialized
//! through the same worker as everything else.

use crate::alarm::{AlarmClock, AlarmId};
use crate::event::{Event, TimeoutEvent};
use crate::queue::{Dequeued, EventQueue};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Stack size for handler worker threads.
const WORKER_STACK_SIZE: usize = 512 * 1024;

/// Dispatcher invoked on the worker thread for each timeout event.
///
/// Registered state captured by the closure is seen verbatim by every
/// firing, playing the role of an opaque timeout context.
pub type TimeoutDispatcher<E> = Arc<dyn Fn(&EventHandler<E>, TimeoutEvent) + Send + Sync>;

/// What the worker dequeues: a collaborator event or a synthesized timeout.
enum Dispatchable<E> {
    Event(E),
    Timeout(TimeoutEvent),
}

struct TimeoutRegistration<E: Event> {
    period: Duration,
    dispatcher: TimeoutDispatcher<E>,
}

struct HandlerState<E: Event> {
    /// Identity of the worker thread, recorded for the whole time one is
    /// running; cleared by the worker itself on exit.
    worker: Option<ThreadId>,
    /// Join handle for the running worker; taken by `stop`.
    join: Option<thread::JoinHandle<()>>,
    timeout: Option<TimeoutRegistration<E>>,
    /// The armed timeout alarm, while running with a timeout dispatcher.
    alarm: Option<AlarmId>,
}

struct HandlerShared<E: Event> {
    name: String,
    queue: EventQueue<Dispatchable<E>>,
    /// Guards handler metadata only; never held across a dispatch call.
    state: Mutex<HandlerState<E>>,
    /// Externally owned lock held for the duration of each dispatch.
    dispatch_lock: Option<Arc<Mutex<()>>>,
}

/// Handle to a single-consumer event loop.
///
/// Handles are cheap to clone and may be used from any thread, including
/// from a dispatcher running on the handler's own worker thread. `start`
/// and `stop` may be called repeatedly; both are no-ops when the handler is
/// already in the target state.
pub struct EventHandler<E: Event> {
    shared: Arc<HandlerShared<E>>,
}

impl<E: Event> Clone for EventHandler<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Event> EventHandler<E> {
    /// Creates a stopped handler with an empty queue.
    ///
    /// `dispatch_lock`, if supplied, is acquired before and released after
    /// every dispatch; it is how a collaborator synchronizes dispatch with
    /// its own state. The handler never holds it otherwise.
    pub fn new(name: impl Into<String>, dispatch_lock: Option<Arc<Mutex<()>>>) -> Self {
        Self {
            shared: Arc::new(HandlerShared {
                name: name.into(),
                queue: EventQueue::new(),
                state: Mutex::new(HandlerState {
                    worker: None,
                    join: None,
                    timeout: None,
                    alarm: None,
                }),
                dispatch_lock,
            }),
        }
    }

    /// The handler's name, also carried by its worker thread.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Registers the dispatcher for the built-in timeout event.
    ///
    /// Takes effect at the next `start`; it does not arm an alarm on a
    /// handler that is already running. Registering again before a later
    /// `start` replaces the previous period and dispatcher.
    pub fn set_timeout_dispatcher<F>(&self, period: Duration, dispatcher: F)
    where
        F: Fn(&EventHandler<E>, TimeoutEvent) + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        state.timeout = Some(TimeoutRegistration {
            period,
            dispatcher: Arc::new(dispatcher),
        });
    }

    /// Starts the worker thread; a no-op if the handler is already running.
    ///
    /// Events already queued are dispatched in FIFO order. If a timeout
    /// dispatcher is registered, a periodic alarm is armed on the shared
    /// clock; its firings enqueue timeout events out-of-band.
    pub fn start(&self) {
        let clock = AlarmClock::create_if_necessary();

        let mut state = self.shared.state.lock();
        if state.worker.is_some() || state.join.is_some() {
            return;
        }

        // A preceding stop aborted the queue; the new run owns it now.
        self.shared.queue.reset_abort();

        if let Some(period) = state.timeout.as_ref().map(|t| t.period) {
            let shared: Weak<HandlerShared<E>> = Arc::downgrade(&self.shared);
            state.alarm = Some(clock.add_alarm_periodic(
                move |expiration| {
                    if let Some(shared) = shared.upgrade() {
                        shared
                            .queue
                            .enqueue_head(Dispatchable::Timeout(TimeoutEvent { expiration }));
                    }
                },
                period,
            ));
        }

        let worker = self.clone();
        let join = thread::Builder::new()
            .name(self.shared.name.clone())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker.run())
            .expect("failed to spawn event handler worker");

        // Record the worker identity before releasing the lock: the first
        // dispatched event may already query `is_current_thread`, and that
        // query takes this lock.
        state.worker = Some(join.thread().id());
        state.join = Some(join);
        debug!("event handler '{}' started", self.shared.name);
    }

    /// Stops the worker thread; a no-op if the handler is already stopped.
    ///
    /// Disarms the timeout alarm, waits for any in-flight dispatch to
    /// finish and the worker to exit, then discards all remaining queued
    /// events. After `stop` returns, no dispatcher runs until the next
    /// `start`.
    pub fn stop(&self) {
        let join = {
            let mut state = self.shared.state.lock();
            match state.join.take() {
                Some(join) => {
                    if let Some(alarm) = state.alarm.take() {
                        if let Err(err) = AlarmClock::shared().remove_alarm(alarm) {
                            warn!("event handler '{}': {}", self.shared.name, err);
                        }
                    }
                    self.shared.queue.abort_wait();
                    join
                }
                None => return,
            }
        };

        // Join with the state lock released: an in-flight dispatch may
        // itself need the lock (e.g. `is_running`) before the worker can
        // observe the abort. The recorded worker identity stays set until
        // the worker exits, so there is no start/stop race while we wait.
        let _ = join.join();

        let mut state = self.shared.state.lock();
        if state.join.is_none() {
            // No start intervened; finish by re-arming the queue and
            // discarding whatever was left undispatched.
            self.shared.queue.reset_abort();
            self.shared.queue.clear();
        }
        debug!("event handler '{}' stopped", self.shared.name);
    }

    /// Stops the handler and releases this handle.
    ///
    /// The queue is freed when the last handle drops; a running worker
    /// holds its own handle, so teardown cannot race a dispatch.
    pub fn destroy(self) {
        self.stop();
    }

    /// Enqueues an event at the FIFO tail. Never blocks; callable from any
    /// thread, including re-entrantly from a dispatcher.
    pub fn signal_event(&self, event: E) {
        self.shared.queue.enqueue_tail(Dispatchable::Event(event));
    }

    /// Enqueues an event out-of-band, ahead of all pending tail events but
    /// behind earlier out-of-band events. Never blocks.
    pub fn signal_event_oob(&self, event: E) {
        self.shared.queue.enqueue_head(Dispatchable::Event(event));
    }

    /// Discards all queued, undispatched events.
    ///
    /// For external use only while the handler is stopped; `stop` performs
    /// this itself.
    pub fn clear(&self) {
        self.shared.queue.clear();
    }

    /// Number of queued, undispatched events.
    pub fn pending_events(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether a worker thread is currently recorded.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().worker.is_some()
    }

    /// Whether the calling thread is this handler's worker thread.
    ///
    /// Lets a dispatcher decide between acting synchronously and queuing.
    pub fn is_current_thread(&self) -> bool {
        self.shared.state.lock().worker == Some(thread::current().id())
    }

    /// The worker loop: block-dequeue one event, dispatch, repeat until the
    /// queue wait is aborted by `stop`.
    fn run(&self) {
        trace!("event handler '{}' worker running", self.shared.name);
        loop {
            match self.shared.queue.dequeue_wait() {
                Dequeued::Item(Dispatchable::Event(event)) => {
                    let _dispatch = self.shared.dispatch_lock.as_ref().map(|lock| lock.lock());
                    trace!("event handler '{}' dispatching '{}'", self.shared.name, event.name());
                    event.dispatch(self);
                }
                Dequeued::Item(Dispatchable::Timeout(timeout)) => {
                    // Fetched under the state lock, invoked outside it.
                    let dispatcher = {
                        let state = self.shared.state.lock();
                        state.timeout.as_ref().map(|t| Arc::clone(&t.dispatcher))
                    };
                    if let Some(dispatcher) = dispatcher {
                        let _dispatch = self.shared.dispatch_lock.as_ref().map(|lock| lock.lock());
                        trace!("event handler '{}' dispatching timeout", self.shared.name);
                        dispatcher(self, timeout);
                    }
                }
                Dequeued::Aborted => break,
            }
        }

        let mut state = self.shared.state.lock();
        state.worker = None;
        trace!("event handler '{}' worker exited", self.shared.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping {
        hits: Arc<AtomicUsize>,
    }

    impl Event for Ping {
        fn name(&self) -> &'static str {
            "ping"
        }

        fn dispatch(self, _handler: &EventHandler<Self>) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for_hits(hits: &AtomicUsize, expected: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) < expected {
            assert!(
                std::time::Instant::now() < deadline,
                "timed out waiting for {} dispatches",
                expected
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let handler: EventHandler<Ping> = EventHandler::new("wallet-test", None);
        handler.start();
        handler.start();
        assert!(handler.is_running());
        handler.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let handler: EventHandler<Ping> = EventHandler::new("wallet-test", None);
        handler.stop();
        handler.start();
        handler.stop();
        handler.stop();
        assert!(!handler.is_running());
    }

    #[test]
    fn test_events_queued_while_stopped_survive_and_can_be_cleared() {
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = EventHandler::new("wallet-test", None);

        for _ in 0..3 {
            handler.signal_event(Ping {
                hits: Arc::clone(&hits),
            });
        }
        assert_eq!(handler.pending_events(), 3);

        handler.clear();
        assert_eq!(handler.pending_events(), 0);

        // Queue again and let a run dispatch them.
        for _ in 0..2 {
            handler.signal_event(Ping {
                hits: Arc::clone(&hits),
            });
        }
        handler.start();
        wait_for_hits(&hits, 2);
        handler.stop();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_thread_identity() {
        let checked = Arc::new(AtomicUsize::new(0));

        struct Check {
            checked: Arc<AtomicUsize>,
        }

        impl Event for Check {
            fn name(&self) -> &'static str {
                "check"
            }

            fn dispatch(self, handler: &EventHandler<Self>) {
                assert!(handler.is_current_thread());
                assert!(handler.is_running());
                self.checked.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handler = EventHandler::new("wallet-identity", None);
        assert!(!handler.is_current_thread());

        handler.signal_event(Check {
            checked: Arc::clone(&checked),
        });
        handler.start();
        wait_for_hits(&checked, 1);
        handler.stop();
        assert!(!handler.is_current_thread());
    }

    #[test]
    fn test_destroy_stops_the_worker() {
        let handler: EventHandler<Ping> = EventHandler::new("wallet-test", None);
        handler.start();
        let watcher = handler.clone();
        handler.destroy();
        assert!(!watcher.is_running());
    }
}
