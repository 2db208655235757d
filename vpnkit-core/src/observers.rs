//! Explicit observer registration
//!
//! Each component owns the `Observers` list for the values it publishes.
//! Delivery is synchronous and in registration order; callbacks run on the
//! caller's task after the publisher has already updated its own state.

use std::sync::{Arc, Mutex, PoisonError};

/// Callback invoked with each published value
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Observers<T> {
    callbacks: Mutex<Vec<Observer<T>>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every future notification
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Deliver `value` to every registered callback
    ///
    /// The list is copied first so a callback may subscribe further
    /// observers without deadlocking.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Observer<T>> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
