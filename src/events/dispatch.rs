//! Posting, forwarding and scheduling events
//!
//! A synchronous post runs the receiver's matching handlers first, then, if
//! any of them asks for propagation, the matching handlers of every
//! descendant in pre-order. The descendant list is a snapshot taken under the
//! tree lock at the moment of the post. An async event runs on a worker and
//! propagates before invoking its own handler.

use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::dispatcher::Job;
use super::event::{Arg, Event, EventCall, EventFlags, Handler, MAX_EVENT_ARGS};
use crate::error::{CoreError, CoreResult};
use crate::objects::ObjectRef;
use crate::runtime::Runtime;

/// Bound template followed by the poster's arguments
fn join_args(template: Vec<Arg>, extra: &[Arg]) -> CoreResult<Vec<Arg>> {
    let total = template.len() + extra.len();
    if total > MAX_EVENT_ARGS {
        return Err(CoreError::TooManyArgs(total, MAX_EVENT_ARGS));
    }
    let mut args = template;
    args.extend_from_slice(extra);
    Ok(args)
}

impl Runtime {
    fn invoke(
        &self,
        event: &Arc<Event>,
        handler: &Handler,
        receiver: &ObjectRef,
        sender: Option<&ObjectRef>,
        args: &[Arg],
    ) {
        let call = EventCall {
            runtime: self,
            event,
            name: event.name(),
            receiver,
            sender,
            args,
        };
        handler(&call);
    }

    /// Run one event record against `receiver`. Returns the number of
    /// handlers run or queued.
    fn dispatch(
        &self,
        sender: Option<&ObjectRef>,
        receiver: &ObjectRef,
        event: &Arc<Event>,
        extra: &[Arg],
        propagate: bool,
    ) -> CoreResult<usize> {
        let (handler, template, flags) = event.snapshot();
        let args = join_args(template, extra)?;
        let propagate = propagate && flags.contains(EventFlags::PROPAGATE);

        if flags.contains(EventFlags::ASYNC) {
            let rt = self.clone();
            let event = event.clone();
            let receiver = receiver.clone();
            let sender = sender.cloned();
            let extra = extra.to_vec();
            self.spawn_async(
                event.name().to_string(),
                Box::new(move || {
                    if propagate {
                        rt.propagate(&receiver, event.name(), &extra);
                    }
                    rt.invoke(&event, &handler, &receiver, sender.as_ref(), &args);
                }),
            )?;
            return Ok(1);
        }

        self.invoke(event, &handler, receiver, sender, &args);
        Ok(1)
    }

    /// Hand an invocation to the dispatcher, or to a fresh thread without one
    fn spawn_async(&self, name: String, job: Job) -> CoreResult<()> {
        let job = match self.inner.dispatcher.lock().as_ref() {
            Some(dispatcher) => match dispatcher.submit(job) {
                Ok(()) => return Ok(()),
                Err(job) => job,
            },
            None => job,
        };
        debug!("spawning worker thread for event {}", name);
        thread::Builder::new()
            .name(format!("hemirt-ev-{}", name))
            .spawn(job)
            .map(|_| ())
            .map_err(CoreError::Io)
    }

    /// Deliver `name` to every descendant of `origin`, in pre-order
    pub(crate) fn propagate(&self, origin: &ObjectRef, name: &str, extra: &[Arg]) -> usize {
        let mut count = 0;
        for target in self.descendants(origin) {
            if target.is_terminating() {
                continue;
            }
            for event in target.find_events(name) {
                match self.dispatch(Some(origin), &target, &event, extra, false) {
                    Ok(n) => count += n,
                    Err(e) => {
                        warn!("propagating {} to {}: {}", name, target.path(), e);
                        self.diag().record(&e);
                    }
                }
            }
        }
        count
    }

    /// Post `name` to `receiver`.
    ///
    /// Every handler registered under the name runs, in registration order.
    /// Returns the number of handlers run or queued, including those reached
    /// by propagation; a name with no handlers is not an error.
    pub fn post_event(
        &self,
        sender: Option<&ObjectRef>,
        receiver: &ObjectRef,
        name: &str,
        extra: Vec<Arg>,
    ) -> CoreResult<usize> {
        if receiver.is_terminating() {
            return self.track(Err(CoreError::Terminating(receiver.path())));
        }
        let events = receiver.find_events(name);
        let mut count = 0;
        let mut propagate = false;
        for event in &events {
            let flags = event.flags();
            count += self.track(self.dispatch(sender, receiver, event, &extra, true))?;
            propagate |= flags.contains(EventFlags::PROPAGATE) && !flags.contains(EventFlags::ASYNC);
        }
        if propagate {
            count += self.propagate(receiver, name, &extra);
        }
        Ok(count)
    }

    /// Run an existing event record against another receiver.
    ///
    /// The record's handler, template and flags are used as they are; the
    /// record itself is not changed.
    pub fn forward_event(
        &self,
        sender: Option<&ObjectRef>,
        receiver: &ObjectRef,
        event: &Arc<Event>,
        extra: Vec<Arg>,
    ) -> CoreResult<usize> {
        if receiver.is_terminating() {
            return self.track(Err(CoreError::Terminating(receiver.path())));
        }
        let (_, _, flags) = event.snapshot();
        let mut count = self.track(self.dispatch(sender, receiver, event, &extra, true))?;
        if flags.contains(EventFlags::PROPAGATE) && !flags.contains(EventFlags::ASYNC) {
            count += self.propagate(receiver, event.name(), &extra);
        }
        Ok(count)
    }

    /// Arm the timers of every event named `name` on `receiver` to fire in
    /// `ticks` ticks, replacing earlier armings. Returns the number armed.
    pub fn sched_event(
        &self,
        sender: Option<&ObjectRef>,
        receiver: &ObjectRef,
        ticks: u64,
        name: &str,
        extra: Vec<Arg>,
    ) -> CoreResult<usize> {
        let _lock = receiver.lock();
        let events = receiver.find_events(name);
        if events.is_empty() {
            return self.track(Err(CoreError::NoSuchEvent(name.to_string())));
        }
        let longest = events.iter().map(|e| e.snapshot().1.len()).max().unwrap_or(0);
        let total = longest + extra.len();
        if total > MAX_EVENT_ARGS {
            return self.track(Err(CoreError::TooManyArgs(total, MAX_EVENT_ARGS)));
        }
        for event in &events {
            let due = self
                .inner
                .timers
                .schedule(event, receiver, sender, ticks, extra.clone());
            debug!("scheduled {} on {} for tick {}", name, receiver.path(), due);
        }
        Ok(events.len())
    }

    /// Disarm the timers of every event named `name` on `receiver`.
    /// Returns how many were armed; cancelling an idle event is a no-op.
    pub fn cancel_event(&self, receiver: &ObjectRef, name: &str) -> CoreResult<usize> {
        let _lock = receiver.lock();
        let events = receiver.find_events(name);
        if events.is_empty() {
            return self.track(Err(CoreError::NoSuchEvent(name.to_string())));
        }
        Ok(events.iter().filter(|e| e.cancel_timer()).count())
    }

    /// Advance the timer clock and dispatch what came due. Returns the number
    /// of timers that fired.
    pub fn advance_ticks(&self, ticks: u64) -> usize {
        let fired = self.inner.timers.advance(ticks);
        let count = fired.len();
        for timer in fired {
            if timer.receiver.is_terminating() {
                continue;
            }
            debug!(
                "timer {} fired on {} at tick {}",
                timer.event.name(),
                timer.receiver.path(),
                timer.due
            );
            if let Err(e) = self.forward_event(
                timer.sender.as_ref(),
                &timer.receiver,
                &timer.event,
                timer.args,
            ) {
                warn!("timer {} failed: {}", timer.event.name(), e);
            }
        }
        count
    }

    /// Current timer tick
    pub fn now_ticks(&self) -> u64 {
        self.inner.timers.now()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_args_limit() {
        let template: Vec<Arg> = (0..10u32).map(Arg::from).collect();
        let mut extra: Vec<Arg> = (0..6u32).map(Arg::from).collect();
        let joined = join_args(template.clone(), &extra).unwrap();
        assert_eq!(joined.len(), 16);
        assert_eq!(joined[10].as_i64(), Some(0));

        extra.push(Arg::from("one too many"));
        assert!(matches!(
            join_args(template, &extra),
            Err(CoreError::TooManyArgs(17, 16))
        ));
    }
}
