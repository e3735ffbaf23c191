//! Event system - named handlers, posting, propagation and timers

mod dispatch;
mod dispatcher;
mod event;
mod timers;

pub use dispatcher::{AsyncDispatcher, Job};
pub use event::{handler, Arg, Event, EventCall, EventFlags, Handler, MAX_EVENT_ARGS};
pub use timers::{TimerFired, TimerKey, TimerQueue};
