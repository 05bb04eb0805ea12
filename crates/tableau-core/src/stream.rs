//! Push-based event streams and time-varying values.
//!
//! [`Event`] is a discrete stream of occurrences, [`Behavior`] a value that
//! changes over time. Every remote-triggered feature is wired from these, so
//! their delivery rules are the concurrency model of the whole server:
//!
//! - `send` delivers to every listener, in subscription order, and returns
//!   only after all of them (and everything derived from them) ran.
//! - Listener lists are copied before delivery; a listener may subscribe,
//!   unsubscribe or send re-entrantly.
//! - The outermost `send` on a thread opens a dispatch *turn*. Behavior
//!   updates made during a turn are committed when the turn ends, so all
//!   reads inside one turn agree on the value.

use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

/// Handle returned by [`Event::subscribe`].
pub type ListenerId = u64;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: ListenerId,
    entries: Vec<(ListenerId, Listener<T>)>,
}

thread_local! {
    static TURN_DEPTH: Cell<usize> = const { Cell::new(0) };
    static PENDING: RefCell<Vec<Box<dyn FnOnce()>>> = RefCell::new(Vec::new());
}

/// Guard for one level of dispatch nesting.
struct Turn;

impl Turn {
    fn enter() -> Self {
        TURN_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Turn
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let depth = TURN_DEPTH.with(|depth| {
            let remaining = depth.get().saturating_sub(1);
            depth.set(remaining);
            remaining
        });
        if depth > 0 {
            return;
        }
        if std::thread::panicking() {
            // A faulted turn commits nothing.
            PENDING.with(|pending| pending.borrow_mut().clear());
            return;
        }
        loop {
            let batch = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
            if batch.is_empty() {
                break;
            }
            for commit in batch {
                commit();
            }
        }
    }
}

/// Run `commit` at the end of the current turn, or now if there is none.
fn defer(commit: impl FnOnce() + 'static) {
    if TURN_DEPTH.with(Cell::get) == 0 {
        commit();
    } else {
        PENDING.with(|pending| pending.borrow_mut().push(Box::new(commit)));
    }
}

/// A discrete stream of occurrences.
///
/// Cloning an `Event` yields another handle to the same stream.
pub struct Event<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("listeners", &self.listeners.lock().entries.len())
            .finish()
    }
}

impl<T: 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Event<T> {
    /// Create a source event that fires whenever [`send`](Self::send) is called.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// An event that never fires.
    ///
    /// Switching to `zero()` silences a finished interaction.
    #[must_use]
    pub fn zero() -> Self {
        Self::new()
    }

    /// Register a listener. Listeners run in subscription order.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().entries.len()
    }

    /// Deliver one occurrence to every current listener.
    pub fn send(&self, value: T) {
        let _turn = Turn::enter();
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(&value);
        }
    }

    /// Transform every occurrence.
    #[must_use]
    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + Send + Sync + 'static) -> Event<U> {
        let out = Event::new();
        let target = out.clone();
        self.subscribe(move |value| target.send(f(value)));
        out
    }

    /// Transform occurrences, dropping those mapped to `None`.
    #[must_use]
    pub fn filter_map<U: 'static>(
        &self,
        f: impl Fn(&T) -> Option<U> + Send + Sync + 'static,
    ) -> Event<U> {
        let out = Event::new();
        let target = out.clone();
        self.subscribe(move |value| {
            if let Some(mapped) = f(value) {
                target.send(mapped);
            }
        });
        out
    }
}

impl<T: Clone + 'static> Event<T> {
    /// Keep only occurrences matching `pred`.
    #[must_use]
    pub fn filter(&self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Event<T> {
        let out = Event::new();
        let target = out.clone();
        self.subscribe(move |value| {
            if pred(value) {
                target.send(value.clone());
            }
        });
        out
    }

    /// Interleave several events. Every occurrence of every input is kept.
    #[must_use]
    pub fn merge(events: &[Event<T>]) -> Event<T> {
        let out = Event::new();
        for event in events {
            let target = out.clone();
            event.subscribe(move |value| target.send(value.clone()));
        }
        out
    }

    /// Pair every occurrence with the current value of `behavior`.
    #[must_use]
    pub fn snapshot<B: Clone + Send + 'static>(&self, behavior: &Behavior<B>) -> Event<(T, B)> {
        snapshot(self, behavior)
    }
}

impl<T: Clone + 'static> Event<Event<T>> {
    /// Follow only the most recently produced inner event.
    ///
    /// Each new inner event replaces the previous subscription, so trailing
    /// occurrences of an older inner event are no longer forwarded.
    #[must_use]
    pub fn switch_latest(&self) -> Event<T> {
        let out = Event::new();
        let current: Arc<Mutex<Option<(Event<T>, ListenerId)>>> = Arc::new(Mutex::new(None));
        let target = out.clone();
        self.subscribe(move |inner: &Event<T>| {
            let mut current = current.lock();
            if let Some((previous, id)) = current.take() {
                previous.unsubscribe(id);
            }
            let forward = target.clone();
            let id = inner.subscribe(move |value| forward.send(value.clone()));
            *current = Some((inner.clone(), id));
        });
        out
    }
}

/// A value that changes over time.
pub struct Behavior<T> {
    value: Arc<Mutex<T>>,
    changes: Event<T>,
}

impl<T> Clone for Behavior<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            changes: self.changes.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Behavior<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("now", &*self.value.lock())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Behavior<T> {
    /// A behavior that holds `initial` until `event` fires, then the latest
    /// occurrence.
    #[must_use]
    pub fn starts_with(event: &Event<T>, initial: T) -> Self {
        let behavior = Self {
            value: Arc::new(Mutex::new(initial)),
            changes: Event::new(),
        };
        let value = Arc::clone(&behavior.value);
        let changes = behavior.changes.clone();
        event.subscribe(move |next: &T| {
            let next = next.clone();
            let value = Arc::clone(&value);
            let changes = changes.clone();
            defer(move || {
                *value.lock() = next.clone();
                changes.send(next);
            });
        });
        behavior
    }

    /// A behavior that never changes.
    #[must_use]
    pub fn constant(value: T) -> Self {
        Self::starts_with(&Event::zero(), value)
    }

    /// The current value.
    #[must_use]
    pub fn now(&self) -> T {
        self.value.lock().clone()
    }

    /// Fires with the new value after every committed change.
    #[must_use]
    pub fn changes(&self) -> Event<T> {
        self.changes.clone()
    }

    /// Derive a behavior by applying `f` to every value.
    #[must_use]
    pub fn map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> Behavior<U> {
        let f = Arc::new(f);
        let initial = f(&self.now());
        let mapper = Arc::clone(&f);
        Behavior::starts_with(&self.changes.map(move |value| mapper(value)), initial)
    }
}

/// Pair every occurrence of `event` with the value `behavior` held when the
/// current turn started.
#[must_use]
pub fn snapshot<E, B>(event: &Event<E>, behavior: &Behavior<B>) -> Event<(E, B)>
where
    E: Clone + 'static,
    B: Clone + Send + 'static,
{
    let behavior = behavior.clone();
    event.map(move |value| (value.clone(), behavior.now()))
}
