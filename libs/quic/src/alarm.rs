//! Protocol timers backed by a dispatcher.
//!
//! The QUIC engine exposes a single "next timeout" per connection. A
//! [`QuicAlarm`] mirrors that deadline onto the dispatcher and is re-armed
//! whenever the engine reports a new one. Dropping an alarm cancels its timer,
//! so a connection tears its timers down on the dispatcher that created them.

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::dispatcher::{Dispatcher, TimerCallback, TimerId};

/// Creates alarms bound to one dispatcher.
pub struct QuicAlarmFactory {
    dispatcher: Rc<dyn Dispatcher>,
}

impl QuicAlarmFactory {
    pub fn new(dispatcher: Rc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Create an unarmed alarm that notifies `delegate` on expiry.
    pub fn create_alarm(&self, delegate: Weak<dyn TimerCallback>) -> QuicAlarm {
        QuicAlarm {
            dispatcher: Rc::clone(&self.dispatcher),
            delegate,
            timer: Cell::new(None),
            deadline: Cell::new(None),
        }
    }

    pub fn dispatcher(&self) -> &Rc<dyn Dispatcher> {
        &self.dispatcher
    }
}

/// A single re-armable timer.
pub struct QuicAlarm {
    dispatcher: Rc<dyn Dispatcher>,
    delegate: Weak<dyn TimerCallback>,
    timer: Cell<Option<TimerId>>,
    deadline: Cell<Option<Instant>>,
}

impl QuicAlarm {
    /// Arm for `deadline`, or disarm with None.
    ///
    /// Re-arming for the deadline already scheduled is a no-op.
    pub fn update(&self, deadline: Option<Instant>) {
        if self.deadline.get() == deadline && (deadline.is_none() || self.timer.get().is_some()) {
            return;
        }

        self.cancel();
        if let Some(deadline) = deadline {
            let timer = self.dispatcher.schedule(deadline, self.delegate.clone());
            self.timer.set(Some(timer));
            self.deadline.set(Some(deadline));
        }
    }

    /// Disarm the alarm.
    pub fn cancel(&self) {
        if let Some(timer) = self.timer.take() {
            self.dispatcher.cancel(timer);
        }
        self.deadline.set(None);
    }

    /// Forget the scheduled timer after the dispatcher has fired it.
    pub fn on_fired(&self) {
        self.timer.set(None);
        self.deadline.set(None);
    }

    pub fn is_set(&self) -> bool {
        self.timer.get().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }
}

impl Drop for QuicAlarm {
    fn drop(&mut self) {
        debug_assert!(
            self.dispatcher.is_thread_safe(),
            "QUIC alarm dropped off its dispatcher thread"
        );
        self.cancel();
    }
}
