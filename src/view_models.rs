//! View models: per-entry state holders that live as long as the entry.

use crate::error::NavError;
use core::any::{type_name, Any};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam::channel::{self, Receiver, Sender};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A state holder scoped to an entry (or to a controller, for shared view models).
///
/// Will be closed when its storage is cleared, which happens when the owning entry is torn down.
pub trait ViewModel: Any + Send + Sync {
    /// Called once when the view model is closed, after its scope has been cancelled.
    fn on_closed(&self) {}
}

/// Never sent; the [`ViewModelScope::cancelled`] channel only ever disconnects.
#[derive(Debug)]
pub enum Never {}

/// Cancellation signal handed to a view model at creation.
///
/// Cancelled synchronously when the view model is closed. Work started on behalf of the view
/// model should watch [`ViewModelScope::cancelled`] and stop when it disconnects.
#[derive(Clone)]
pub struct ViewModelScope(Arc<ScopeInner>);

struct ScopeInner {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<Never>>>,
    receiver: Receiver<Never>,
}

impl ViewModelScope {
    pub fn new() -> ViewModelScope {
        let (sender, receiver) = channel::bounded(0);
        ViewModelScope(Arc::new(ScopeInner {
            cancelled: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver,
        }))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// A receiver that disconnects when the scope is cancelled.
    pub fn cancelled(&self) -> Receiver<Never> {
        self.0.receiver.clone()
    }

    /// Cancels the scope. Idempotent.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
        drop(self.0.sender.lock().take());
    }
}

impl Default for ViewModelScope {
    fn default() -> Self {
        ViewModelScope::new()
    }
}

impl fmt::Debug for ViewModelScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ViewModelScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct Slot {
    any: Arc<dyn Any + Send + Sync>,
    model: Arc<dyn ViewModel>,
    type_name: &'static str,
    scope: ViewModelScope,
}

impl Slot {
    fn close(self, key: &str) {
        tracing::trace!(key, view_model = self.type_name, "closing view model");
        self.scope.cancel();
        self.model.on_closed();
    }
}

/// Keyed view model registry with get-or-create semantics.
#[derive(Default)]
pub struct ViewModelsStorage {
    slots: Mutex<IndexMap<String, Slot>>,
}

impl ViewModelsStorage {
    pub fn new() -> ViewModelsStorage {
        ViewModelsStorage::default()
    }

    /// Returns the view model stored under `key`, creating it if there is none.
    ///
    /// Fails if `key` holds a view model of another type.
    pub fn get_or_create<T, F>(&self, key: &str, create: F) -> Result<Arc<T>, NavError>
    where
        T: ViewModel,
        F: FnOnce(ViewModelScope) -> T,
    {
        if let Some(existing) = self.get::<T>(key)? {
            return Ok(existing);
        }

        // create outside the lock; constructors may ask for other view models
        let scope = ViewModelScope::new();
        let model = Arc::new(create(scope.clone()));

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            // created re-entrantly under the same key; keep the first one
            let existing = Arc::clone(&slot.any);
            drop(slots);
            scope.cancel();
            model.on_closed();
            return existing
                .downcast::<T>()
                .map_err(|_| type_mismatch::<T>(key));
        }
        tracing::trace!(key, view_model = type_name::<T>(), "creating view model");
        slots.insert(
            key.to_string(),
            Slot {
                any: Arc::clone(&model) as Arc<dyn Any + Send + Sync>,
                model: Arc::clone(&model) as Arc<dyn ViewModel>,
                type_name: type_name::<T>(),
                scope,
            },
        );
        Ok(model)
    }

    /// [`ViewModelsStorage::get_or_create`] keyed by the type name.
    pub fn get_or_create_by_type<T, F>(&self, create: F) -> Result<Arc<T>, NavError>
    where
        T: ViewModel,
        F: FnOnce(ViewModelScope) -> T,
    {
        self.get_or_create(type_name::<T>(), create)
    }

    /// Returns the view model under `key`, if any.
    pub fn get<T: ViewModel>(&self, key: &str) -> Result<Option<Arc<T>>, NavError> {
        let slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) => Arc::clone(&slot.any)
                .downcast::<T>()
                .map(Some)
                .map_err(|_| type_mismatch::<T>(key)),
            None => Ok(None),
        }
    }

    /// Removes and closes a single view model. Returns whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        let slot = self.slots.lock().shift_remove(key);
        match slot {
            Some(slot) => {
                slot.close(key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.lock().keys().cloned().collect()
    }

    /// Closes and removes every view model, in insertion order.
    pub fn clear(&self) {
        let slots = std::mem::take(&mut *self.slots.lock());
        for (key, slot) in slots {
            slot.close(&key);
        }
    }
}

fn type_mismatch<T>(key: &str) -> NavError {
    NavError::ViewModelTypeMismatch {
        key: key.to_string(),
        expected: type_name::<T>(),
    }
}

impl fmt::Debug for ViewModelsStorage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_map()
            .entries(slots.iter().map(|(k, slot)| (k, slot.type_name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::RecvTimeoutError;
    use std::time::Duration;

    #[derive(Debug)]
    struct Counter {
        scope: ViewModelScope,
        closed: Arc<AtomicBool>,
    }

    impl ViewModel for Counter {
        fn on_closed(&self) {
            assert!(self.scope.is_cancelled(), "scope should be cancelled before on_closed");
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Other;
    impl ViewModel for Other {}

    #[test]
    fn get_or_create_reuses_the_instance() {
        let storage = ViewModelsStorage::new();
        let closed = Arc::new(AtomicBool::new(false));
        let a = storage
            .get_or_create("counter", |scope| Counter {
                scope,
                closed: Arc::clone(&closed),
            })
            .unwrap();
        let b = storage
            .get_or_create::<Counter, _>("counter", |_| panic!("should not create twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let storage = ViewModelsStorage::new();
        storage.get_or_create("vm", |_| Other).unwrap();
        let closed = Arc::new(AtomicBool::new(false));
        let err = storage
            .get_or_create("vm", |scope| Counter { scope, closed })
            .unwrap_err();
        assert!(matches!(err, NavError::ViewModelTypeMismatch { .. }));
    }

    #[test]
    fn clear_cancels_scopes_and_closes() {
        let storage = ViewModelsStorage::new();
        let closed = Arc::new(AtomicBool::new(false));
        let vm = storage
            .get_or_create_by_type(|scope| Counter {
                scope,
                closed: Arc::clone(&closed),
            })
            .unwrap();
        let cancelled = vm.scope.cancelled();
        assert_eq!(
            cancelled.recv_timeout(Duration::from_millis(1)).unwrap_err(),
            RecvTimeoutError::Timeout,
            "scope should still be live"
        );

        storage.clear();
        assert!(closed.load(Ordering::SeqCst));
        assert!(storage.is_empty());
        assert_eq!(
            cancelled.recv_timeout(Duration::from_millis(1)).unwrap_err(),
            RecvTimeoutError::Disconnected,
            "scope channel should disconnect on cancel"
        );
    }

    #[test]
    fn remove_closes_one() {
        let storage = ViewModelsStorage::new();
        storage.get_or_create("a", |_| Other).unwrap();
        storage.get_or_create("b", |_| Other).unwrap();
        assert!(storage.remove("a"));
        assert!(!storage.remove("a"));
        assert_eq!(storage.keys(), vec!["b".to_string()]);
    }
}
