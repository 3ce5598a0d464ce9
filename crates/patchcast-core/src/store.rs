//! Holder for the single current value of the observed state.
//!
//! [`StateStore`] keeps no history: once a value is superseded it is gone.
//! It has no locking of its own; the [`Broadcaster`](crate::Broadcaster)
//! owns it behind the same mutex as the subscriber registry.

/// The current state snapshot.
#[derive(Debug, Clone, Default)]
pub struct StateStore<S> {
    current: S,
}

impl<S> StateStore<S> {
    /// Create a store holding `initial`.
    pub const fn new(initial: S) -> Self {
        Self { current: initial }
    }

    /// Borrow the current value without copying it.
    pub const fn peek(&self) -> &S {
        &self.current
    }

    /// Replace the current value.
    pub fn set(&mut self, next: S) {
        self.current = next;
    }
}

impl<S: Clone> StateStore<S> {
    /// Return an independent copy of the current value.
    pub fn get(&self) -> S {
        self.current.clone()
    }
}
