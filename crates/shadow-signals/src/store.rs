use std::cell::{Cell, RefCell};
use std::fmt;

use indexmap::IndexMap;

use crate::signal::Signal;

/// Keyed collection of [`Signal`]s created on first use.
///
/// The store owns its cells: [`SignalStore::destroy`] (or dropping the store)
/// disposes each of them, which drops every effect and listener subscribed to
/// them even if reader handles are still held elsewhere.
pub struct SignalStore<T> {
    cells: RefCell<IndexMap<String, Signal<T>>>,
    destroyed: Cell<bool>,
}

impl<T: Clone + PartialEq + Default + 'static> SignalStore<T> {
    pub fn new() -> Self {
        Self {
            cells: RefCell::new(IndexMap::new()),
            destroyed: Cell::new(false),
        }
    }

    /// Returns the cell for `name`, creating it with `T::default()` when
    /// missing. A destroyed store hands out detached cells.
    pub fn signal(&self, name: &str) -> Signal<T> {
        if self.destroyed.get() {
            log::debug!("signal '{name}' requested from a destroyed store");
            return Signal::detached(T::default());
        }
        self.cells
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| Signal::new(T::default()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Signal<T>> {
        self.cells.borrow().get(name).cloned()
    }

    /// Current value of `name` without creating the cell.
    pub fn value(&self, name: &str) -> Option<T> {
        self.cells.borrow().get(name).map(Signal::peek)
    }

    /// Writes `value` into the (lazily created) cell; see [`Signal::set`].
    pub fn set(&self, name: &str, value: T) -> bool {
        self.signal(name).set(value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells.borrow().contains_key(name)
    }

    /// Cell names in creation order.
    pub fn names(&self) -> Vec<String> {
        self.cells.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.borrow().is_empty()
    }

    /// Disposes and forgets a single cell.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.cells.borrow_mut().shift_remove(name);
        match removed {
            Some(signal) => {
                signal.dispose();
                true
            }
            None => false,
        }
    }

    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        let cells: Vec<_> = self.cells.borrow_mut().drain(..).collect();
        for (_, signal) in cells {
            signal.dispose();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for SignalStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SignalStore<T> {
    fn drop(&mut self) {
        for (_, signal) in self.cells.get_mut().drain(..) {
            signal.dispose();
        }
    }
}

impl<T> fmt::Debug for SignalStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalStore")
            .field("cells", &self.cells.borrow().keys().collect::<Vec<_>>())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}
