//! Single-threaded execution context.
//!
//! A dispatcher owns one thread's event loop. The QUIC layer only needs three
//! things from it:
//! - An identity, to check that per-thread state is used on its own thread
//! - A clock
//! - Timer registration
//!
//! [`LocalDispatcher`] is the in-tree implementation. It keeps a deadline-ordered
//! timer registry and leaves the waiting to whoever drives the loop: the loop
//! sleeps until [`LocalDispatcher::next_deadline`] and then calls
//! [`LocalDispatcher::fire_expired`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::trace;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique dispatcher identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatcherId(u64);

impl DispatcherId {
    fn next() -> Self {
        Self(NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying value.
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatcher-{}", self.0)
    }
}

/// Identifier of a scheduled timer, unique within its dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Receiver of timer expirations.
pub trait TimerCallback {
    /// Called on the dispatcher thread once the timer deadline has passed.
    fn on_timer(&self, now: Instant);
}

/// Source of the current time.
pub trait TimeSource {
    fn now(&self) -> Instant;
}

/// Wall-clock monotonic time.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealTimeSource;

impl TimeSource for RealTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced time, for deterministic tests and simulations.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Cell<Instant>,
}

impl ManualTimeSource {
    /// Start at the current instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start at a given instant.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to a given instant. Time never moves backwards.
    pub fn set(&self, to: Instant) {
        if to > self.now.get() {
            self.now.set(to);
        }
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Execution context of one thread.
///
/// Implementations are expected to be `!Send`; handles to a dispatcher are
/// `Rc<dyn Dispatcher>` and stay on the thread that created them.
pub trait Dispatcher {
    /// Identity used for affinity checks.
    fn id(&self) -> DispatcherId;

    /// Human-readable name (e.g., "worker_0").
    fn name(&self) -> &str;

    /// Current time according to this dispatcher.
    fn now(&self) -> Instant;

    /// Schedule `callback` to run once `deadline` has passed.
    ///
    /// The dispatcher holds the callback weakly: a dropped callback is skipped.
    fn schedule(&self, deadline: Instant, callback: Weak<dyn TimerCallback>) -> TimerId;

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    fn cancel(&self, timer: TimerId) -> bool;

    /// True when called from the thread that runs this dispatcher.
    fn is_thread_safe(&self) -> bool;
}

/// Timer registry and clock for one thread.
pub struct LocalDispatcher {
    id: DispatcherId,
    name: String,
    thread_id: ThreadId,
    time_source: Rc<dyn TimeSource>,
    next_timer: Cell<u64>,
    /// Timers ordered by deadline, then registration order.
    timers: RefCell<BTreeMap<(Instant, TimerId), Weak<dyn TimerCallback>>>,
    /// Deadline lookup for cancellation.
    deadlines: RefCell<HashMap<TimerId, Instant>>,
}

impl LocalDispatcher {
    /// Create a dispatcher using the real clock.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_time_source(name, Rc::new(RealTimeSource))
    }

    /// Create a dispatcher with a custom time source.
    pub fn with_time_source(name: impl Into<String>, time_source: Rc<dyn TimeSource>) -> Self {
        Self {
            id: DispatcherId::next(),
            name: name.into(),
            thread_id: thread::current().id(),
            time_source,
            next_timer: Cell::new(0),
            timers: RefCell::new(BTreeMap::new()),
            deadlines: RefCell::new(HashMap::new()),
        }
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .borrow()
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Number of timers waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.deadlines.borrow().len()
    }

    /// Run every timer whose deadline is at or before `now`.
    ///
    /// Returns the number of callbacks invoked. Callbacks may schedule new
    /// timers; those only run on a later call, even if already expired.
    pub fn fire_expired(&self, now: Instant) -> usize {
        debug_assert!(self.is_thread_safe());

        let expired = {
            let mut timers = self.timers.borrow_mut();
            let mut deadlines = self.deadlines.borrow_mut();
            let mut expired = Vec::new();
            while let Some(entry) = timers.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                let ((_, timer), callback) = entry.remove_entry();
                deadlines.remove(&timer);
                expired.push(callback);
            }
            expired
        };

        let mut fired = 0;
        for callback in expired {
            if let Some(callback) = callback.upgrade() {
                callback.on_timer(now);
                fired += 1;
            }
        }

        if fired > 0 {
            trace!(dispatcher = %self.id, fired, "Timers fired");
        }
        fired
    }
}

impl Dispatcher for LocalDispatcher {
    fn id(&self) -> DispatcherId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn now(&self) -> Instant {
        self.time_source.now()
    }

    fn schedule(&self, deadline: Instant, callback: Weak<dyn TimerCallback>) -> TimerId {
        let timer = TimerId(self.next_timer.get());
        self.next_timer.set(timer.0 + 1);

        self.timers.borrow_mut().insert((deadline, timer), callback);
        self.deadlines.borrow_mut().insert(timer, deadline);
        timer
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let Some(deadline) = self.deadlines.borrow_mut().remove(&timer) else {
            return false;
        };
        self.timers.borrow_mut().remove(&(deadline, timer));
        true
    }

    fn is_thread_safe(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl fmt::Debug for LocalDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDispatcher")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}
