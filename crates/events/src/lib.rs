//! Event dispatch core for the ChainKit multi-chain wallet.
//!
//! Every blockchain backend reduces its asynchronous work (network
//! callbacks, periodic polling and the like) to typed events that are
//! queued and dispatched one at a time by a dedicated worker thread. This
//! crate provides that core:
//!
//! - [`EventQueue`]: a thread-safe FIFO with a second, out-of-band lane
//!   that is always drained first, blocking removal, and cooperative abort.
//! - [`AlarmClock`]: one process-wide timer scheduler shared by all
//!   handlers, driving periodic and one-shot alarms from a single thread.
//! - [`EventHandler`]: the unit of serialized dispatch, owning one queue
//!   and one worker thread, with an optional periodic timeout and a
//!   start/stop/signal lifecycle.
//!
//! Collaborators define their event kinds as one enum per handler
//! implementing [`Event`], signal values of it into the handler, and the
//! worker thread invokes each event's dispatcher in queue order.

pub mod alarm;
pub mod error;
pub mod event;
pub mod handler;
pub mod queue;

pub use alarm::{AlarmClock, AlarmId};
pub use error::{EventError, EventResult};
pub use event::{Event, TimeoutEvent};
pub use handler::{EventHandler, TimeoutDispatcher};
pub use queue::{Dequeued, EventQueue};
