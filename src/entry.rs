use crate::attachment::{AttachEvent, Attachment};
use crate::controller::NavController;
use crate::destination::{DestinationRef, UnresolvedDestination};
use crate::error::{NavError, RestoreError, SaveError};
use crate::id::{EntryId, IdGenerator, RandomIds};
use crate::nav_controllers::NavControllersStorage;
use crate::payload::{Payload, PayloadSaveError};
use crate::saved_state::{SavedState, SavedValue};
use crate::view_models::ViewModelsStorage;
use core::fmt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;

type StateSaver = Arc<dyn Fn() -> SavedState + Send + Sync>;

/// One occurrence of a destination on a stack.
///
/// `NavEntry` is a handle; clones refer to the same entry. An entry belongs to at most one
/// controller at a time and is torn down (view models closed, child controllers closed) once it
/// is neither on a controller's stack nor attached to the UI.
#[derive(Clone)]
pub struct NavEntry(Arc<EntryInner>);

struct EntryInner {
    id: EntryId,
    /// Replaced exactly once if the entry was restored with a placeholder.
    destination: Mutex<DestinationRef>,
    nav_args: Option<Payload>,
    free_args: Mutex<Option<Payload>>,
    nav_result: Mutex<Option<Payload>>,
    /// The last UI snapshot, either captured at save time or restored.
    ui_state: Mutex<Option<SavedState>>,
    state_saver: Mutex<Option<StateSaver>>,
    attachment: Mutex<Attachment>,
    view_models: ViewModelsStorage,
    nav_controllers: NavControllersStorage,
}

impl NavEntry {
    /// Creates an entry with a random id.
    pub fn new(destination: DestinationRef, nav_args: Option<Payload>) -> NavEntry {
        NavEntry::with_id(RandomIds.next_id(), destination, nav_args)
    }

    pub fn with_id(id: EntryId, destination: DestinationRef, nav_args: Option<Payload>) -> NavEntry {
        NavEntry(Arc::new(EntryInner {
            id,
            destination: Mutex::new(destination),
            nav_args,
            free_args: Mutex::new(None),
            nav_result: Mutex::new(None),
            ui_state: Mutex::new(None),
            state_saver: Mutex::new(None),
            attachment: Mutex::new(Attachment::Detached),
            view_models: ViewModelsStorage::new(),
            nav_controllers: NavControllersStorage::new(),
        }))
    }

    pub fn id(&self) -> EntryId {
        self.0.id
    }

    pub fn destination(&self) -> DestinationRef {
        Arc::clone(&self.0.destination.lock())
    }

    pub fn destination_name(&self) -> String {
        self.0.destination.lock().name().to_string()
    }

    /// False between a restore and destination resolution.
    pub fn is_resolved(&self) -> bool {
        self.0.destination.lock().is_resolved()
    }

    /// Replaces a placeholder destination with the real one. Does nothing if already resolved.
    pub fn resolve_destination<F>(&self, lookup: F) -> Result<(), NavError>
    where
        F: Fn(&str) -> Option<DestinationRef>,
    {
        self.resolve_in(&lookup, None)
    }

    pub(crate) fn resolve_in(
        &self,
        lookup: &dyn Fn(&str) -> Option<DestinationRef>,
        controller: Option<&str>,
    ) -> Result<(), NavError> {
        let mut destination = self.0.destination.lock();
        if destination.is_resolved() {
            return Ok(());
        }
        match lookup(destination.name()) {
            Some(resolved) => {
                tracing::trace!(entry = %self.0.id, destination = resolved.name(), "resolved destination");
                *destination = resolved;
                Ok(())
            }
            None => Err(NavError::UnknownDestination {
                name: destination.name().to_string(),
                controller: controller.map(str::to_string),
            }),
        }
    }

    /// The typed arguments given at navigation time.
    pub fn nav_args<T>(&self) -> Option<Arc<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.0.nav_args.as_ref().and_then(Payload::get)
    }

    pub fn nav_args_payload(&self) -> Option<Payload> {
        self.0.nav_args.clone()
    }

    pub fn free_args<T>(&self) -> Option<Arc<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.0.free_args.lock().as_ref().and_then(Payload::get)
    }

    pub fn free_args_payload(&self) -> Option<Payload> {
        self.0.free_args.lock().clone()
    }

    pub fn set_free_args(&self, free_args: Option<Payload>) {
        *self.0.free_args.lock() = free_args;
    }

    /// The result passed to [`NavController::back_with`] when navigating back to this entry.
    pub fn nav_result<T>(&self) -> Option<Arc<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.0.nav_result.lock().as_ref().and_then(Payload::get)
    }

    pub fn nav_result_payload(&self) -> Option<Payload> {
        self.0.nav_result.lock().clone()
    }

    /// Takes the result so it is only handled once.
    pub fn take_nav_result(&self) -> Option<Payload> {
        self.0.nav_result.lock().take()
    }

    pub(crate) fn set_nav_result(&self, result: Option<Payload>) {
        *self.0.nav_result.lock() = result;
    }

    /// The last captured UI snapshot.
    pub fn ui_state(&self) -> Option<SavedState> {
        self.0.ui_state.lock().clone()
    }

    pub fn set_ui_state(&self, state: Option<SavedState>) {
        *self.0.ui_state.lock() = state;
    }

    /// Registers the callback that captures fresh UI state while the entry is on screen.
    pub fn set_state_saver<F>(&self, saver: F)
    where
        F: Fn() -> SavedState + Send + Sync + 'static,
    {
        *self.0.state_saver.lock() = Some(Arc::new(saver));
    }

    pub fn clear_state_saver(&self) {
        *self.0.state_saver.lock() = None;
    }

    pub fn view_models(&self) -> &ViewModelsStorage {
        &self.0.view_models
    }

    pub fn nav_controllers(&self) -> &NavControllersStorage {
        &self.0.nav_controllers
    }

    pub fn attachment(&self) -> Attachment {
        *self.0.attachment.lock()
    }

    pub fn is_attached_to_controller(&self) -> bool {
        self.attachment().is_attached_to_controller()
    }

    pub fn is_attached_to_ui(&self) -> bool {
        self.attachment().is_attached_to_ui()
    }

    /// Called by the UI layer when the entry's content mounts.
    pub fn attach_to_ui(&self) {
        self.transition(AttachEvent::AttachUi);
    }

    /// Called by the UI layer when the entry's content unmounts (after any exit animation).
    ///
    /// Captures the UI state first, so it survives the entry sitting in the back stack.
    pub fn detach_from_ui(&self) {
        if self.is_attached_to_ui() {
            self.capture_ui_state();
        }
        self.transition(AttachEvent::DetachUi);
    }

    /// Attaches the entry to a controller, failing if it already has one.
    pub(crate) fn ensure_detached_and_attach(&self) -> Result<(), NavError> {
        let mut attachment = self.0.attachment.lock();
        if attachment.is_attached_to_controller() {
            return Err(NavError::AlreadyAttached {
                entry: self.0.id,
                destination: self.destination_name(),
            });
        }
        *attachment = attachment.apply(AttachEvent::AttachController).next;
        tracing::trace!(entry = %self.0.id, state = ?*attachment, "attached to controller");
        Ok(())
    }

    pub(crate) fn detach_from_controller(&self) {
        self.transition(AttachEvent::DetachController);
    }

    fn transition(&self, event: AttachEvent) {
        let step = {
            let mut attachment = self.0.attachment.lock();
            let step = attachment.apply(event);
            *attachment = step.next;
            step
        };
        if !step.unchanged {
            tracing::trace!(entry = %self.0.id, ?event, state = ?step.next, "attachment changed");
        }
        if step.teardown {
            self.close();
        }
    }

    fn close(&self) {
        tracing::debug!(entry = %self.0.id, destination = %self.destination_name(), "tearing down entry");
        self.0.view_models.clear();
        self.0.nav_controllers.clear();
    }

    fn capture_ui_state(&self) {
        let saver = self.0.state_saver.lock().clone();
        if let Some(saver) = saver {
            let state = saver();
            *self.0.ui_state.lock() = Some(state);
        }
    }

    /// Saves the entry: destination name, id, arguments, result, UI snapshot and child
    /// controllers.
    ///
    /// A missing payload is saved as null and a present one as `{value}`, so payloads whose saved
    /// form is itself null (`()`, `None`) come back as payloads.
    ///
    /// `controller` is the key of the owning controller, used in error messages.
    pub fn save_to_saved_state(&self, controller: Option<&str>) -> Result<SavedState, SaveError> {
        if self.is_attached_to_ui() {
            self.capture_ui_state();
        }
        let destination = self.destination_name();
        let save_payload = |field: &'static str, payload: Option<Payload>| -> Result<SavedValue, SaveError> {
            match payload {
                None => Ok(SavedValue::Null),
                Some(payload) => payload
                    .save()
                    .map(|value| SavedValue::State(SavedState::new().with("value", value)))
                    .map_err(|err| match err {
                        PayloadSaveError::Transient(type_name) => SaveError::Unsaveable {
                            field,
                            destination: destination.clone(),
                            controller: controller.map(str::to_string),
                            type_name,
                        },
                        PayloadSaveError::Encode(source) => SaveError::Encode {
                            field,
                            destination: destination.clone(),
                            controller: controller.map(str::to_string),
                            source,
                        },
                    }),
            }
        };

        let nav_args = save_payload("navArgs", self.nav_args_payload())?;
        let free_args = save_payload("freeArgs", self.free_args_payload())?;
        let nav_result = save_payload("navResult", self.nav_result_payload())?;
        let nav_controllers = self.0.nav_controllers.save_to_saved_state()?;

        Ok(SavedState::new()
            .with("destination", destination.as_str())
            .with("uuid", self.0.id.to_string())
            .with("navArgs", nav_args)
            .with("freeArgs", free_args)
            .with("navResult", nav_result)
            .with("savedState", self.ui_state())
            .with("navControllers", nav_controllers))
    }

    /// Rebuilds an entry with a placeholder destination. Child controllers are parented to
    /// `controller`, the controller the entry is being restored into.
    pub(crate) fn restore_from_saved_state(
        controller: &NavController,
        state: &SavedState,
        path: &str,
    ) -> Result<NavEntry, RestoreError> {
        let name = state.require_str("destination", path)?;
        let uuid = state.require_str("uuid", path)?;
        let id = EntryId::parse(uuid).map_err(|source| RestoreError::InvalidUuid {
            value: uuid.to_string(),
            path: path.to_string(),
            source,
        })?;
        let payload = |key: &str| -> Result<Option<Payload>, RestoreError> {
            match state.optional_state(key, path)? {
                Some(boxed) => {
                    let value = boxed.require("value", &format!("{}/{}", path, key))?;
                    Ok(Some(Payload::restored(value.clone())))
                }
                None => Ok(None),
            }
        };

        let entry = NavEntry::with_id(
            id,
            Arc::new(UnresolvedDestination {
                name: name.to_string(),
            }),
            payload("navArgs")?,
        );
        entry.set_free_args(payload("freeArgs")?);
        entry.set_nav_result(payload("navResult")?);
        entry.set_ui_state(state.optional_state("savedState", path)?.cloned());
        let children = state.require_list("navControllers", path)?;
        entry
            .0
            .nav_controllers
            .load_from_saved_state(controller, children, path)?;
        Ok(entry)
    }

    /// Attaches a freshly restored entry to its controller.
    pub(crate) fn attach_restored(&self) {
        self.transition(AttachEvent::AttachController);
    }
}

impl PartialEq for NavEntry {
    fn eq(&self, other: &NavEntry) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for NavEntry {}

impl fmt::Debug for NavEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NavEntry")
            .field("id", &self.0.id)
            .field("destination", &self.destination_name())
            .field("attachment", &self.attachment())
            .finish()
    }
}
