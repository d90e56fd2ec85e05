//! Single-threaded reactive cells.
//!
//! A [`Signal`] is a readable/writable cell. Reading it with [`Signal::get`]
//! while an [`Effect`] runs subscribes that effect; writing a different value
//! re-runs every subscribed effect synchronously. Cells only hold weak
//! handles to their subscribers, so whoever owns an `Effect` or a
//! [`Subscription`] decides how long it lives.
//!
//! A [`SignalStore`] owns a keyed set of cells. Destroying the store disposes
//! every cell it created and severs every subscription, even while other
//! handles to those cells are still around.

mod signal;
mod store;

pub use signal::{Effect, Reader, Signal, Subscription, untracked};
pub use store::SignalStore;
