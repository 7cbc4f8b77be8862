//! Child controllers for nested navigation, owned by an entry.

use crate::controller::NavController;
use crate::error::{NavError, RestoreError, SaveError};
use crate::saved_state::{SavedState, SavedValue};
use core::fmt;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Keyed registry of child controllers.
///
/// Clearing the storage closes every child, which in turn tears down their entries.
#[derive(Default)]
pub struct NavControllersStorage {
    controllers: Mutex<IndexMap<String, NavController>>,
}

impl NavControllersStorage {
    pub fn new() -> NavControllersStorage {
        NavControllersStorage::default()
    }

    /// Returns the controller stored under `key`, creating it if there is none.
    ///
    /// A controller restored from saved state is returned as is; the caller should then declare its
    /// destinations with [`NavController::set_destinations`].
    pub fn get_or_create<F>(&self, key: &str, create: F) -> Result<NavController, NavError>
    where
        F: FnOnce() -> Result<NavController, NavError>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        // build outside the lock; the start destination may create grandchildren
        let controller = create()?;
        let mut controllers = self.controllers.lock();
        if let Some(existing) = controllers.get(key) {
            let existing = existing.clone();
            drop(controllers);
            controller.close();
            return Ok(existing);
        }
        controllers.insert(key.to_string(), controller.clone());
        Ok(controller)
    }

    pub fn get(&self, key: &str) -> Option<NavController> {
        self.controllers.lock().get(key).cloned()
    }

    /// Removes and closes one controller.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.controllers.lock().shift_remove(key);
        match removed {
            Some(controller) => {
                controller.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.controllers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.controllers.lock().keys().cloned().collect()
    }

    /// Closes and removes every controller.
    pub fn clear(&self) {
        let controllers = std::mem::take(&mut *self.controllers.lock());
        for (_, controller) in controllers {
            controller.close();
        }
    }

    /// Saves the saveable children as a list of `{key, controller}` states.
    pub fn save_to_saved_state(&self) -> Result<Vec<SavedValue>, SaveError> {
        let controllers: Vec<_> = self
            .controllers
            .lock()
            .iter()
            .filter(|(_, controller)| controller.is_saveable())
            .map(|(key, controller)| (key.clone(), controller.clone()))
            .collect();

        let mut saved = Vec::with_capacity(controllers.len());
        for (key, controller) in controllers {
            let state = controller.save_to_saved_state()?;
            saved.push(SavedValue::State(
                SavedState::new().with("key", key).with("controller", state),
            ));
        }
        Ok(saved)
    }

    /// Restores children saved by [`NavControllersStorage::save_to_saved_state`], parented to
    /// `parent`.
    pub fn load_from_saved_state(
        &self,
        parent: &NavController,
        saved: &[SavedValue],
        path: &str,
    ) -> Result<(), RestoreError> {
        let mut restored = Vec::with_capacity(saved.len());
        for (i, value) in saved.iter().enumerate() {
            let item_path = format!("{}/navControllers[{}]", path, i);
            let state = match value {
                SavedValue::State(state) => state,
                other => {
                    return Err(RestoreError::WrongType {
                        key: i.to_string(),
                        expected: "state",
                        found: other.kind(),
                        path: item_path,
                    })
                }
            };
            let key = state.require_str("key", &item_path)?.to_string();
            let controller_state = match state.require("controller", &item_path)? {
                SavedValue::State(state) => state,
                other => {
                    return Err(RestoreError::WrongType {
                        key: "controller".into(),
                        expected: "state",
                        found: other.kind(),
                        path: item_path,
                    })
                }
            };
            let controller = NavController::restore_at(Some(parent), controller_state, &item_path)?;
            restored.push((key, controller));
        }

        let mut controllers = self.controllers.lock();
        for (key, controller) in restored {
            if let Some(replaced) = controllers.insert(key, controller) {
                replaced.close();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NavControllersStorage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.controllers.lock().values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{DestinationRef, NavDestination};

    fn tabs(key: &str, saveable: bool) -> Result<NavController, NavError> {
        let feed: DestinationRef = NavDestination::<()>::shared("feed");
        NavController::builder()
            .key(key)
            .saveable(saveable)
            .destinations(vec![feed.clone()])
            .start(&feed)
            .build()
    }

    #[test]
    fn get_or_create_returns_the_same_controller() {
        let storage = NavControllersStorage::new();
        let a = storage.get_or_create("tabs", || tabs("tabs", true)).unwrap();
        let b = storage
            .get_or_create("tabs", || panic!("should not build twice"))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clear_closes_children() {
        let storage = NavControllersStorage::new();
        let child = storage.get_or_create("tabs", || tabs("tabs", true)).unwrap();
        let entry = child.current_entry().unwrap();
        storage.clear();
        assert!(child.is_closed());
        assert!(!entry.is_attached_to_controller());
        assert!(storage.is_empty());
    }

    #[test]
    fn only_saveable_children_are_saved() {
        let storage = NavControllersStorage::new();
        storage.get_or_create("kept", || tabs("kept", true)).unwrap();
        storage.get_or_create("dropped", || tabs("dropped", false)).unwrap();

        let saved = storage.save_to_saved_state().unwrap();
        assert_eq!(saved.len(), 1);

        let parent = NavController::builder().key("root").build().unwrap();
        let restored = NavControllersStorage::new();
        restored.load_from_saved_state(&parent, &saved, "root").unwrap();
        assert_eq!(restored.keys(), vec!["kept".to_string()]);
        let child = restored.get("kept").unwrap();
        assert_eq!(child.parent(), Some(parent));
        assert_eq!(child.current().map(|d| d.name().to_string()), Some("feed".into()));
    }

    #[test]
    fn malformed_child_state_fails() {
        let parent = NavController::builder().build().unwrap();
        let storage = NavControllersStorage::new();
        let err = storage
            .load_from_saved_state(&parent, &[SavedValue::Int(4)], "root")
            .unwrap_err();
        assert!(matches!(err, RestoreError::WrongType { .. }), "got {:?}", err);
    }
}
