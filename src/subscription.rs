use std::{mem::take, rc::Weak};

use crate::{
    atom::AtomId,
    store::{Store, StoreInner},
};

/// Guard for an active subscription.
///
/// Dropping the guard removes the listener from every target atom and
/// re-runs the mount-closure computation, potentially unmounting nodes. A
/// guard can only be dropped once, so teardown is naturally idempotent.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    /// A subscription that does nothing when dropped.
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }

    pub(crate) fn new(store: Weak<StoreInner>, entries: Vec<(AtomId, usize)>) -> Self {
        Subscription(RawSubscription::Listeners { store, entries })
    }

    /// Remove the listener now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}

    /// Keep the subscription alive for the lifetime of the store.
    pub fn leak(mut self) {
        self.0 = RawSubscription::Empty;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Listeners { store, entries } => {
                if let Some(inner) = store.upgrade() {
                    let store = Store::from_inner(inner);
                    for (atom, key) in entries {
                        store.remove_listener(atom, key);
                    }
                }
            }
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Listeners {
        store: Weak<StoreInner>,
        entries: Vec<(AtomId, usize)>,
    },
}
