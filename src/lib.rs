//! A reactive atom store.
//!
//! State is declared as small, composable *atoms*: [`state`] cells hold
//! values, [`computed`] atoms derive values from other atoms, and
//! [`command`] atoms perform writes. Atom descriptors carry no values;
//! values live in a [`Store`], so the same atoms can back any number of
//! independent stores.
//!
//! Reads are lazy and cached. Writes eagerly notify just the subscribed
//! part of the graph, and a listener is invoked at most once per
//! notification pass no matter how many of its inputs changed.
//!
//! ```
//! use protium::{computed, state, Store};
//!
//! let store = Store::new();
//! let celsius = state(25.0_f64).named("celsius");
//! let fahrenheit = {
//!     let celsius = celsius.clone();
//!     computed(move |cx| Ok(cx.get(&celsius)? * 9.0 / 5.0 + 32.0))
//! };
//!
//! assert_eq!(store.get(&fahrenheit)?, 77.0);
//! store.set(&celsius, 100.0)?;
//! assert_eq!(store.get(&fahrenheit)?, 212.0);
//! # Ok::<(), protium::StoreError>(())
//! ```
//!
//! Unsubscribed atoms cost nothing once dropped: a store only retains
//! nodes whose descriptor is still alive or that are reachable from an
//! active [`Store::sub`] subscription.

mod atom;
mod debug;
mod error;
mod store;
mod subscription;

pub use atom::{
    command, command_async, command_with_read, computed, computed_async, state, state_uninit,
    AnyAtom, AsyncCommand, AsyncComputed, AtomId, Command, Computed, StateAtom,
};
pub use debug::{AtomSummary, DebugTree, StoreDebug};
pub use error::StoreError;
pub use store::{AsyncReadContext, CommandContext, ReadContext, Readable, Store};
pub use subscription::Subscription;
