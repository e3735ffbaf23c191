//! Event records, arguments and handler calls

use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::timers::{TimerKey, TimerQueue};
use crate::objects::{ObjectRef, Opaque};
use crate::runtime::Runtime;

/// Largest number of positional arguments an invocation may carry
pub const MAX_EVENT_ARGS: usize = 16;

/// Event dispatch flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u8);

impl EventFlags {
    pub const NONE: Self = Self(0);
    /// Run the handler outside the caller's control flow
    pub const ASYNC: Self = Self(0x01);
    /// Forward to every descendant of the receiver
    pub const PROPAGATE: Self = Self(0x02);
    /// A timer is armed for this event
    pub const SCHEDULED: Self = Self(0x04);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x07)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for EventFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A positional event argument
#[derive(Clone)]
pub enum Arg {
    Object(ObjectRef),
    Pointer(Opaque),
    Str(String),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Arg {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Arg::U8(v) => Some(v as i64),
            Arg::I8(v) => Some(v as i64),
            Arg::U16(v) => Some(v as i64),
            Arg::I16(v) => Some(v as i64),
            Arg::U32(v) => Some(v as i64),
            Arg::I32(v) => Some(v as i64),
            Arg::U64(v) => i64::try_from(v).ok(),
            Arg::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Arg::F32(v) => Some(v as f64),
            Arg::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Arg::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Opaque> {
        match self {
            Arg::Pointer(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Object(o) => write!(f, "Object({})", o.path()),
            Arg::Pointer(_) => f.write_str("Pointer(..)"),
            Arg::Str(s) => write!(f, "Str({:?})", s),
            Arg::U8(v) => write!(f, "U8({})", v),
            Arg::I8(v) => write!(f, "I8({})", v),
            Arg::U16(v) => write!(f, "U16({})", v),
            Arg::I16(v) => write!(f, "I16({})", v),
            Arg::U32(v) => write!(f, "U32({})", v),
            Arg::I32(v) => write!(f, "I32({})", v),
            Arg::U64(v) => write!(f, "U64({})", v),
            Arg::I64(v) => write!(f, "I64({})", v),
            Arg::F32(v) => write!(f, "F32({})", v),
            Arg::F64(v) => write!(f, "F64({})", v),
        }
    }
}

macro_rules! arg_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Arg {
            fn from(v: $ty) -> Self {
                Arg::$variant(v)
            }
        })*
    };
}

arg_from!(
    u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32,
    u64 => U64, i64 => I64, f32 => F32, f64 => F64, String => Str,
    ObjectRef => Object,
);

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<&ObjectRef> for Arg {
    fn from(o: &ObjectRef) -> Self {
        Arg::Object(o.clone())
    }
}

/// One handler invocation.
///
/// `args` is the event's bound argument template followed by the arguments
/// supplied by the poster.
pub struct EventCall<'a> {
    pub runtime: &'a Runtime,
    /// Record whose handler is running
    pub event: &'a Arc<Event>,
    pub name: &'a str,
    pub receiver: &'a ObjectRef,
    pub sender: Option<&'a ObjectRef>,
    pub args: &'a [Arg],
}

impl EventCall<'_> {
    pub fn arg(&self, i: usize) -> Option<&Arg> {
        self.args.get(i)
    }

    pub fn int(&self, i: usize) -> Option<i64> {
        self.arg(i).and_then(Arg::as_i64)
    }

    pub fn float(&self, i: usize) -> Option<f64> {
        self.arg(i).and_then(Arg::as_f64)
    }

    pub fn str(&self, i: usize) -> Option<&str> {
        self.arg(i).and_then(Arg::as_str)
    }

    pub fn object(&self, i: usize) -> Option<&ObjectRef> {
        self.arg(i).and_then(Arg::as_object)
    }
}

/// Event handler
pub type Handler = Arc<dyn Fn(&EventCall<'_>) + Send + Sync>;

/// Wrap a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&EventCall<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct EventInner {
    handler: Handler,
    args: Vec<Arg>,
    flags: EventFlags,
}

/// Armed timer of an event
pub(crate) struct TimerSlot {
    pub(crate) queue: Weak<TimerQueue>,
    pub(crate) key: TimerKey,
}

/// A named handler registered on an object
pub struct Event {
    id: u64,
    name: String,
    inner: Mutex<EventInner>,
    pub(crate) timer: Mutex<Option<TimerSlot>>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self.args();
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("args", &args)
            .field("flags", &self.flags())
            .finish()
    }
}

impl Event {
    pub(crate) fn new(id: u64, name: String, handler: Handler, args: Vec<Arg>, flags: EventFlags) -> Self {
        Self {
            id,
            name,
            inner: Mutex::new(EventInner {
                handler,
                args,
                flags: Self::own_flags(flags),
            }),
            timer: Mutex::new(None),
        }
    }

    fn own_flags(mut flags: EventFlags) -> EventFlags {
        flags.remove(EventFlags::SCHEDULED);
        flags
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch flags; `SCHEDULED` reflects whether a timer is armed
    pub fn flags(&self) -> EventFlags {
        let mut flags = self.inner.lock().flags;
        if self.is_scheduled() {
            flags.insert(EventFlags::SCHEDULED);
        }
        flags
    }

    pub fn is_scheduled(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn args(&self) -> Vec<Arg> {
        self.inner.lock().args.clone()
    }

    pub fn handler(&self) -> Handler {
        self.inner.lock().handler.clone()
    }

    /// Handler, template and flags as one consistent snapshot
    pub(crate) fn snapshot(&self) -> (Handler, Vec<Arg>, EventFlags) {
        let inner = self.inner.lock();
        (inner.handler.clone(), inner.args.clone(), inner.flags)
    }

    /// Replace handler, template and flags, keeping identity and any armed timer
    pub(crate) fn reinit(&self, handler: Handler, args: Vec<Arg>, flags: EventFlags) {
        let mut inner = self.inner.lock();
        inner.handler = handler;
        inner.args = args;
        inner.flags = Self::own_flags(flags);
    }

    /// Disarm the timer; returns false if none was armed
    pub fn cancel_timer(&self) -> bool {
        let mut slot = self.timer.lock();
        match slot.take() {
            Some(armed) => {
                if let Some(queue) = armed.queue.upgrade() {
                    queue.remove(armed.key);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = EventFlags::ASYNC | EventFlags::PROPAGATE;
        assert!(flags.contains(EventFlags::ASYNC));
        assert!(!flags.contains(EventFlags::SCHEDULED));
        flags.remove(EventFlags::ASYNC);
        assert_eq!(flags, EventFlags::PROPAGATE);
        assert_eq!(EventFlags::from_bits(0xff).bits(), 0x07);
    }

    #[test]
    fn test_scheduled_flag_not_settable() {
        let ev = Event::new(
            1,
            "tick".into(),
            handler(|_| {}),
            vec![Arg::from(3u8)],
            EventFlags::SCHEDULED,
        );
        assert!(!ev.flags().contains(EventFlags::SCHEDULED));
        assert!(!ev.cancel_timer());
    }

    #[test]
    fn test_arg_accessors() {
        assert_eq!(Arg::from(7u16).as_i64(), Some(7));
        assert_eq!(Arg::from(0.5f32).as_f64(), Some(0.5));
        assert_eq!(Arg::from("hi").as_str(), Some("hi"));
        assert!(Arg::from(1i32).as_str().is_none());
        assert!(Arg::from(u64::MAX).as_i64().is_none());
    }
}
