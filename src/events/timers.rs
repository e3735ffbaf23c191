//! Tick-driven timer queue
//!
//! Each event has at most one armed timer. Arming an armed event cancels the
//! old arming first. The queue has its own lock, separate from object locks
//! and the tree lock; it is always taken last and never held while a handler
//! runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::event::{Arg, Event, TimerSlot};
use crate::objects::{Object, ObjectRef};

/// Position of a timer in the queue: due tick, then arming order
pub type TimerKey = (u64, u64);

/// A pending firing
struct Timer {
    event: Weak<Event>,
    receiver: Weak<Object>,
    sender: Option<Weak<Object>>,
    args: Vec<Arg>,
}

/// A timer that came due
pub struct TimerFired {
    pub event: Arc<Event>,
    pub receiver: ObjectRef,
    pub sender: Option<ObjectRef>,
    pub args: Vec<Arg>,
    pub due: u64,
}

#[derive(Default)]
struct TimerState {
    now: u64,
    seq: u64,
    pending: BTreeMap<TimerKey, Timer>,
}

/// Timer queue of one runtime
#[derive(Default)]
pub struct TimerQueue {
    state: Mutex<TimerState>,
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimerQueue")
            .field("now", &state.now)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl TimerQueue {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current tick count
    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Tick at which the next timer fires
    pub fn next_due(&self) -> Option<u64> {
        self.state.lock().pending.keys().next().map(|k| k.0)
    }

    /// Arm `event` to fire `ticks` from now, replacing an earlier arming.
    /// Returns the due tick.
    pub fn schedule(
        self: &Arc<Self>,
        event: &Arc<Event>,
        receiver: &ObjectRef,
        sender: Option<&ObjectRef>,
        ticks: u64,
        args: Vec<Arg>,
    ) -> u64 {
        let mut slot = event.timer.lock();
        let mut state = self.state.lock();
        if let Some(old) = slot.take() {
            state.pending.remove(&old.key);
            debug!("rearming event {} (was due at {})", event.name(), old.key.0);
        }

        let due = state.now.saturating_add(ticks);
        state.seq += 1;
        let key = (due, state.seq);
        state.pending.insert(
            key,
            Timer {
                event: Arc::downgrade(event),
                receiver: Arc::downgrade(receiver),
                sender: sender.map(Arc::downgrade),
                args,
            },
        );
        *slot = Some(TimerSlot {
            queue: Arc::downgrade(self),
            key,
        });
        due
    }

    /// Drop a queue entry; the event's slot is managed by the caller
    pub(crate) fn remove(&self, key: TimerKey) -> bool {
        self.state.lock().pending.remove(&key).is_some()
    }

    /// Advance the clock and collect every timer now due, in due order.
    ///
    /// Timers whose event or receiver has been dropped, or that were rearmed
    /// after being collected, are discarded.
    pub fn advance(&self, ticks: u64) -> Vec<TimerFired> {
        let due: Vec<(TimerKey, Timer)> = {
            let mut state = self.state.lock();
            state.now = state.now.saturating_add(ticks);
            let cut = (state.now.saturating_add(1), 0);
            let later = state.pending.split_off(&cut);
            std::mem::replace(&mut state.pending, later).into_iter().collect()
        };

        due.into_iter()
            .filter_map(|(key, timer)| {
                let event = timer.event.upgrade()?;
                {
                    let mut slot = event.timer.lock();
                    match slot.as_ref() {
                        Some(armed) if armed.key == key => *slot = None,
                        _ => return None,
                    }
                }
                let Some(receiver) = timer.receiver.upgrade() else {
                    debug!("dropping timer for event {}: receiver gone", event.name());
                    return None;
                };
                Some(TimerFired {
                    event,
                    receiver,
                    sender: timer.sender.and_then(|s| s.upgrade()),
                    args: timer.args,
                    due: key.0,
                })
            })
            .collect()
    }

    /// Disarm every pending timer
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut self.state.lock().pending);
        let count = drained.len();
        for (key, timer) in drained {
            if let Some(event) = timer.event.upgrade() {
                let mut slot = event.timer.lock();
                if slot.as_ref().is_some_and(|armed| armed.key == key) {
                    *slot = None;
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ObjectClass;
    use crate::events::{handler, EventFlags};

    fn fixture() -> (ObjectRef, Arc<Event>, Arc<Event>) {
        let obj = Object::new(1, Arc::new(ObjectClass::root()));
        let a = obj
            .add_event(Some("a"), handler(|_| {}), vec![], EventFlags::NONE)
            .unwrap();
        let b = obj
            .add_event(Some("b"), handler(|_| {}), vec![], EventFlags::NONE)
            .unwrap();
        (obj, a, b)
    }

    #[test]
    fn test_fires_in_due_order() {
        let queue = TimerQueue::shared();
        let (obj, a, b) = fixture();
        assert_eq!(queue.schedule(&a, &obj, None, 5, vec![]), 5);
        assert_eq!(queue.schedule(&b, &obj, None, 2, vec![]), 2);
        assert_eq!(queue.next_due(), Some(2));

        let fired = queue.advance(10);
        let names: Vec<&str> = fired.iter().map(|f| f.event.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(queue.pending(), 0);
        assert!(!a.is_scheduled());
    }

    #[test]
    fn test_rearm_replaces_entry() {
        let queue = TimerQueue::shared();
        let (obj, a, _) = fixture();
        queue.schedule(&a, &obj, None, 100, vec![]);
        queue.schedule(&a, &obj, None, 50, vec![]);
        assert_eq!(queue.pending(), 1);
        assert!(queue.advance(49).is_empty());
        let fired = queue.advance(1);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].due, 50);
        assert!(queue.advance(100).is_empty());
    }

    #[test]
    fn test_dropped_receiver_is_skipped() {
        let queue = TimerQueue::shared();
        let (obj, a, _) = fixture();
        queue.schedule(&a, &obj, None, 1, vec![]);
        drop(obj);
        assert!(queue.advance(1).is_empty());
    }

    #[test]
    fn test_clear_disarms_events() {
        let queue = TimerQueue::shared();
        let (obj, a, b) = fixture();
        queue.schedule(&a, &obj, None, 1, vec![]);
        queue.schedule(&b, &obj, None, 1, vec![]);
        assert_eq!(queue.clear(), 2);
        assert!(!a.is_scheduled() && !b.is_scheduled());
        assert!(!a.cancel_timer());
    }
}
