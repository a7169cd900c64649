//! The per-key primitive behind the State Store (§4.2): a validated,
//! observable value cell. Every `set` runs validator -> snapshot -> assign
//! under a guard -> subscriber fan-out outside the guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::warn;

use crate::errors::{IrcClientError, Result};

/// An async change subscriber. Implemented by handlers that need to await
/// (e.g. writing to the persistence file); the store spawns delivery onto
/// the ambient tokio runtime and does not wait for it.
#[async_trait]
pub trait AsyncSubscriber<T>: Send + Sync {
    async fn on_change(&self, old: &T, new: &T);
}

type SyncSub<T> = Box<dyn Fn(&T, &T) + Send + Sync>;

pub struct Cell<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    value: RwLock<T>,
    validator: Option<Box<dyn Fn(&T) -> Result<()> + Send + Sync>>,
    sync_subs: RwLock<Vec<SyncSub<T>>>,
    async_subs: RwLock<Vec<Arc<dyn AsyncSubscriber<T>>>>,
    in_flight: AtomicBool,
}

impl<T: Clone + Send + Sync + 'static> Cell<T> {
    pub fn new(name: &'static str, initial: T) -> Self {
        Cell {
            name,
            value: RwLock::new(initial),
            validator: None,
            sync_subs: RwLock::new(Vec::new()),
            async_subs: RwLock::new(Vec::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_validator(
        name: &'static str,
        initial: T,
        validator: impl Fn(&T) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Cell {
            name,
            value: RwLock::new(initial),
            validator: Some(Box::new(validator)),
            sync_subs: RwLock::new(Vec::new()),
            async_subs: RwLock::new(Vec::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> T {
        self.value.read().expect("state cell lock poisoned").clone()
    }

    pub fn subscribe(&self, handler: impl Fn(&T, &T) + Send + Sync + 'static) {
        self.sync_subs
            .write()
            .expect("state cell lock poisoned")
            .push(Box::new(handler));
    }

    pub fn subscribe_async(&self, handler: Arc<dyn AsyncSubscriber<T>>) {
        self.async_subs
            .write()
            .expect("state cell lock poisoned")
            .push(handler);
    }

    /// Assign a new value. Rejects re-entrant calls made from inside this
    /// cell's own change handlers (logged, not panicked).
    pub fn set(&self, new: T) -> Result<()> {
        if let Some(validator) = &self.validator {
            validator(&new)?;
        }

        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!("re-entrant set() on state key '{}' rejected", self.name);
            return Err(IrcClientError::ValidationFailed {
                field: "state_key",
                reason: format!("re-entrant set() on '{}'", self.name),
            });
        }

        let old = {
            let mut guard = self.value.write().expect("state cell lock poisoned");
            let old = guard.clone();
            *guard = new.clone();
            old
        };

        for sub in self.sync_subs.read().expect("state cell lock poisoned").iter() {
            sub(&old, &new);
        }

        for sub in self
            .async_subs
            .read()
            .expect("state cell lock poisoned")
            .iter()
            .cloned()
        {
            let old = old.clone();
            let new = new.clone();
            tokio::spawn(async move {
                sub.on_change(&old, &new).await;
            });
        }

        self.in_flight.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn set_invokes_sync_subscribers_exactly_once_with_old_and_new() {
        let cell = Cell::new("counter", 0i32);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(RwLock::new((0, 0)));
        {
            let calls = calls.clone();
            let seen = seen.clone();
            cell.subscribe(move |old, new| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.write().unwrap() = (*old, *new);
            });
        }
        cell.set(5).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.read().unwrap(), (0, 5));
        assert_eq!(cell.get(), 5);
    }

    #[test]
    fn failed_validation_leaves_value_unchanged_and_skips_subscribers() {
        let cell = Cell::with_validator("port", 10u16, |v| {
            if *v == 0 {
                Err(IrcClientError::ValidationFailed {
                    field: "port",
                    reason: "must be nonzero".into(),
                })
            } else {
                Ok(())
            }
        });
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            cell.subscribe(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(cell.set(0).is_err());
        assert_eq!(cell.get(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
