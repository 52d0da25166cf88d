//! Event model.

use crate::handler::EventHandler;
use std::time::Instant;

/// A dispatchable event.
///
/// A collaborator defines one type per handler, usually an enum whose
/// variants are the event kinds that handler accepts, and implements this
/// trait on it. The queue moves events by value, so a dispatcher owns its
/// event for the duration of the call.
///
/// `dispatch` runs on the handler's worker thread, under the externally
/// supplied dispatch lock if the handler was created with one. It may
/// signal further events on the same handler; they are dispatched after the
/// current call returns.
pub trait Event: Send + Sized + 'static {
    /// Short name of the event kind, used in logs.
    fn name(&self) -> &'static str;

    /// Handles the event.
    fn dispatch(self, handler: &EventHandler<Self>);
}

/// The built-in timeout event.
///
/// Synthesized by a handler's periodic alarm and delivered out-of-band, so
/// it competes for dispatch exactly like any other urgent signal. Its
/// dispatcher is registered with
/// [`EventHandler::set_timeout_dispatcher`], never through an [`Event`]
/// implementation; the registration's captured state plays the role of the
/// timeout context.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutEvent {
    /// When the alarm that produced this event expired.
    pub expiration: Instant,
}
