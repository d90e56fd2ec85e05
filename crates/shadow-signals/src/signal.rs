use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Upper bound for an effect that keeps invalidating itself while it runs.
const MAX_RERUNS: usize = 100;

thread_local! {
    static NEXT_OBSERVER_ID: Cell<u64> = const { Cell::new(1) };

    /// Innermost entry is the effect currently collecting dependencies.
    /// `None` marks an `untracked` section.
    static TRACKING: RefCell<Vec<Option<Rc<EffectInner>>>> = const { RefCell::new(Vec::new()) };
}

fn next_observer_id() -> u64 {
    NEXT_OBSERVER_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

trait Observer {
    fn notify(self: Rc<Self>);
}

trait Source {
    fn unsubscribe(&self, observer: u64);
}

struct CellInner<T> {
    value: RefCell<T>,
    observers: RefCell<Vec<(u64, Weak<dyn Observer>)>>,
    disposed: Cell<bool>,
}

impl<T> CellInner<T> {
    fn subscribe(&self, id: u64, observer: Weak<dyn Observer>) {
        if self.disposed.get() {
            return;
        }
        let mut observers = self.observers.borrow_mut();
        if observers.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        observers.push((id, observer));
    }

    fn live_observers(&self) -> Vec<Rc<dyn Observer>> {
        let mut observers = self.observers.borrow_mut();
        observers.retain(|(_, weak)| weak.strong_count() > 0);
        observers.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }
}

impl<T> Source for CellInner<T> {
    fn unsubscribe(&self, observer: u64) {
        self.observers.borrow_mut().retain(|(id, _)| *id != observer);
    }
}

/// A reactive cell: the readable/writable pair handed out by a
/// [`SignalStore`](crate::SignalStore) or created standalone.
pub struct Signal<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.inner.value.borrow())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl<T> Signal<T> {
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub(crate) fn dispose(&self) {
        self.inner.disposed.set(true);
        self.inner.observers.borrow_mut().clear();
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(CellInner {
                value: RefCell::new(value),
                observers: RefCell::new(Vec::new()),
                disposed: Cell::new(false),
            }),
        }
    }

    /// A cell that is already disposed; writes are ignored and nothing can
    /// subscribe to it.
    pub(crate) fn detached(value: T) -> Self {
        let signal = Self::new(value);
        signal.inner.disposed.set(true);
        signal
    }

    /// Current value. Subscribes the running effect, if any.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Current value without subscribing anything.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Stores `value` and notifies subscribers synchronously.
    ///
    /// Returns `false` when the cell is disposed or the value did not change.
    pub fn set(&self, value: T) -> bool {
        if self.inner.disposed.get() {
            return false;
        }
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        for observer in self.inner.live_observers() {
            observer.notify();
        }
        true
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.peek();
        f(&mut next);
        self.set(next)
    }

    /// Calls `callback` with the new value after every change until the
    /// returned guard is dropped.
    pub fn subscribe(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        let listener = Rc::new(Listener {
            cell: Rc::downgrade(&self.inner),
            callback: RefCell::new(Box::new(callback)),
        });
        let id = next_observer_id();
        let observer: Rc<dyn Observer> = listener;
        self.inner.subscribe(id, Rc::downgrade(&observer));
        let source: Weak<dyn Source> = Rc::downgrade(&self.inner) as Weak<dyn Source>;
        Subscription {
            id,
            source,
            _observer: observer,
        }
    }

    pub fn reader(&self) -> Reader<T> {
        Reader::from(self.clone())
    }

    /// Number of live effects and listeners attached to this cell.
    pub fn subscriber_count(&self) -> usize {
        self.inner.live_observers().len()
    }

    fn track(&self) {
        if self.inner.disposed.get() {
            return;
        }
        let current = TRACKING.with(|stack| stack.borrow().last().cloned().flatten());
        if let Some(effect) = current {
            let observer: Rc<dyn Observer> = effect.clone();
            self.inner.subscribe(effect.id, Rc::downgrade(&observer));
            let source: Weak<dyn Source> = Rc::downgrade(&self.inner) as Weak<dyn Source>;
            effect.sources.borrow_mut().push(source);
        }
    }
}

/// Read-only view of a [`Signal`].
pub struct Reader<T> {
    signal: Signal<T>,
}

impl<T> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Reader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reader").field(&self.signal).finish()
    }
}

impl<T> From<Signal<T>> for Reader<T> {
    fn from(signal: Signal<T>) -> Self {
        Self { signal }
    }
}

impl<T: Clone + PartialEq + 'static> Reader<T> {
    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn peek(&self) -> T {
        self.signal.peek()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    pub fn subscribe(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        self.signal.subscribe(callback)
    }

    pub fn is_disposed(&self) -> bool {
        self.signal.is_disposed()
    }
}

struct Listener<T> {
    cell: Weak<CellInner<T>>,
    callback: RefCell<Box<dyn FnMut(&T)>>,
}

impl<T: Clone + 'static> Observer for Listener<T> {
    fn notify(self: Rc<Self>) {
        let Some(cell) = self.cell.upgrade() else {
            return;
        };
        let value = cell.value.borrow().clone();
        // A listener that writes back into its own cell must not re-enter.
        if let Ok(mut callback) = self.callback.try_borrow_mut() {
            callback(&value);
        }
    }
}

/// Keeps a [`Signal::subscribe`] callback alive. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    source: Weak<dyn Source>,
    _observer: Rc<dyn Observer>,
}

impl Subscription {
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct EffectInner {
    id: u64,
    run: RefCell<Option<Box<dyn FnMut()>>>,
    sources: RefCell<Vec<Weak<dyn Source>>>,
    running: Cell<bool>,
    pending: Cell<bool>,
    stopped: Cell<bool>,
}

impl EffectInner {
    fn execute(self: &Rc<Self>) {
        if self.stopped.get() {
            return;
        }
        if self.running.get() {
            self.pending.set(true);
            return;
        }
        self.running.set(true);
        let _running = RunningGuard(self.clone());
        let mut reruns = 0;
        loop {
            self.pending.set(false);
            self.release_sources();
            let taken = self.run.borrow_mut().take();
            if let Some(mut f) = taken {
                {
                    let _tracking = TrackingGuard::push(Some(self.clone()));
                    f();
                }
                if !self.stopped.get() {
                    *self.run.borrow_mut() = Some(f);
                }
            }
            if self.stopped.get() || !self.pending.get() {
                break;
            }
            reruns += 1;
            if reruns >= MAX_RERUNS {
                log::warn!("effect {} keeps invalidating itself; stopped after {reruns} reruns", self.id);
                break;
            }
        }
    }

    fn release_sources(&self) {
        let sources: Vec<_> = self.sources.borrow_mut().drain(..).collect();
        for source in sources {
            if let Some(source) = source.upgrade() {
                source.unsubscribe(self.id);
            }
        }
    }

    fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        self.release_sources();
        // Dropped here unless the closure is currently running; `execute`
        // drops it on return in that case.
        let run = self.run.borrow_mut().take();
        drop(run);
    }
}

impl Observer for EffectInner {
    fn notify(self: Rc<Self>) {
        self.execute();
    }
}

struct RunningGuard(Rc<EffectInner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.set(false);
    }
}

struct TrackingGuard;

impl TrackingGuard {
    fn push(effect: Option<Rc<EffectInner>>) -> Self {
        TRACKING.with(|stack| stack.borrow_mut().push(effect));
        TrackingGuard
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        TRACKING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// A side effect that re-runs whenever a signal it read during its last run
/// changes. Dropping the handle stops it.
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Runs `f` once right away, collecting its dependencies.
    pub fn new(f: impl FnMut() + 'static) -> Self {
        let inner = Rc::new(EffectInner {
            id: next_observer_id(),
            run: RefCell::new(Some(Box::new(f))),
            sources: RefCell::new(Vec::new()),
            running: Cell::new(false),
            pending: Cell::new(false),
            stopped: Cell::new(false),
        });
        inner.execute();
        Self { inner }
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Number of signal reads recorded during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .sources
            .borrow()
            .iter()
            .filter(|source| source.strong_count() > 0)
            .count()
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("stopped", &self.inner.stopped.get())
            .finish()
    }
}

/// Runs `f` without subscribing the surrounding effect to anything it reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _tracking = TrackingGuard::push(None);
    f()
}
