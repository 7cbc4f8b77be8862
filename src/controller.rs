use crate::destination::{DestinationRef, Destinations, NavDestination};
use crate::entry::NavEntry;
use crate::error::{NavError, RestoreError, SaveError};
use crate::id::{IdGenerator, RandomIds};
use crate::payload::{Payload, TransitionData};
use crate::route::{FailStrategy, Route, RouteStep};
use crate::saved_state::{SavedState, SavedValue};
use crate::view_models::ViewModelsStorage;
use core::fmt;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// What to navigate to: an existing entry, or a destination (with optional arguments) for which a
/// new entry will be created.
#[derive(Debug, Clone)]
pub enum NavTarget {
    Entry(NavEntry),
    Destination {
        destination: DestinationRef,
        args: Option<Payload>,
    },
}

impl NavTarget {
    pub fn destination_name(&self) -> String {
        match self {
            NavTarget::Entry(entry) => entry.destination_name(),
            NavTarget::Destination { destination, .. } => destination.name().to_string(),
        }
    }
}

impl From<NavEntry> for NavTarget {
    fn from(entry: NavEntry) -> Self {
        NavTarget::Entry(entry)
    }
}

impl From<DestinationRef> for NavTarget {
    fn from(destination: DestinationRef) -> Self {
        NavTarget::Destination {
            destination,
            args: None,
        }
    }
}

impl From<&DestinationRef> for NavTarget {
    fn from(destination: &DestinationRef) -> Self {
        NavTarget::from(Arc::clone(destination))
    }
}

impl<A: 'static> From<&Arc<NavDestination<A>>> for NavTarget {
    fn from(destination: &Arc<NavDestination<A>>) -> Self {
        NavTarget::from(Arc::clone(destination) as DestinationRef)
    }
}

/// A change of the current entry, as seen by the renderer.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: Option<NavEntry>,
    pub to: Option<NavEntry>,
    pub is_forward: bool,
    pub data: Option<TransitionData>,
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Transition) + Send + Sync>;

/// Fallback for a back navigation that found nothing to go back to.
pub type BackFallback = Box<dyn FnOnce(&NavController) -> bool + Send>;

/// Fallback for a [`NavController::pop_to_top_with`] whose destination is not on the stack.
pub type PopToTopFallback =
    Box<dyn FnOnce(&NavController, NavTarget) -> Result<bool, NavError> + Send>;

/// Parameters for [`NavController::back_with`].
#[derive(Default)]
pub struct Back {
    to: Option<String>,
    result: Option<Payload>,
    inclusive: bool,
    transition: Option<TransitionData>,
    or_else: Option<BackFallback>,
}

impl Back {
    /// Back to the top of the back stack.
    pub fn new() -> Back {
        Back::default()
    }

    /// Back to the topmost back stack entry of the destination named `name`.
    pub fn to(name: impl Into<String>) -> Back {
        Back {
            to: Some(name.into()),
            ..Back::default()
        }
    }

    /// Also drop the `to` entry and go to the one below it.
    pub fn inclusive(mut self, inclusive: bool) -> Back {
        self.inclusive = inclusive;
        self
    }

    /// Result handed to the entry that becomes current.
    pub fn result(mut self, result: Payload) -> Back {
        self.result = Some(result);
        self
    }

    pub fn transition(mut self, data: TransitionData) -> Back {
        self.transition = Some(data);
        self
    }

    /// Replaces the default fallback, which delegates to the parent controller.
    pub fn or_else<F>(mut self, or_else: F) -> Back
    where
        F: FnOnce(&NavController) -> bool + Send + 'static,
    {
        self.or_else = Some(Box::new(or_else));
        self
    }
}

impl fmt::Debug for Back {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Back")
            .field("to", &self.to)
            .field("result", &self.result)
            .field("inclusive", &self.inclusive)
            .field("transition", &self.transition)
            .field("or_else", &self.or_else.is_some())
            .finish()
    }
}

/// Parameters for [`NavController::pop_to_top_with`].
pub struct PopToTop {
    target: NavTarget,
    transition: Option<TransitionData>,
    or_else: Option<PopToTopFallback>,
}

impl PopToTop {
    pub fn new(target: impl Into<NavTarget>) -> PopToTop {
        PopToTop {
            target: target.into(),
            transition: None,
            or_else: None,
        }
    }

    pub fn transition(mut self, data: TransitionData) -> PopToTop {
        self.transition = Some(data);
        self
    }

    /// Replaces the default fallback, which navigates to the target.
    pub fn or_else<F>(mut self, or_else: F) -> PopToTop
    where
        F: FnOnce(&NavController, NavTarget) -> Result<bool, NavError> + Send + 'static,
    {
        self.or_else = Some(Box::new(or_else));
        self
    }
}

struct Stack {
    current: Option<NavEntry>,
    back_stack: Vec<NavEntry>,
    transition: Option<Transition>,
    closed: bool,
}

#[derive(Default)]
struct Observers {
    next_listener: u64,
    listeners: Vec<(ListenerId, Listener)>,
    transitions: Vec<Sender<Transition>>,
    back_stacks: Vec<Sender<Vec<NavEntry>>>,
}

struct ControllerInner {
    key: Option<String>,
    saveable: bool,
    parent: Weak<ControllerInner>,
    ids: Arc<dyn IdGenerator>,
    destinations: Mutex<Option<Destinations>>,
    stack: Mutex<Stack>,
    observers: Mutex<Observers>,
    shared_view_models: ViewModelsStorage,
}

/// The navigation state machine.
///
/// A controller owns a back stack and a current entry. The current entry is modeled separately
/// from the back stack because it is the target of the transition in flight.
///
/// `NavController` is a handle; clones refer to the same controller. A controller only holds a
/// weak reference to its parent; child controllers are owned by entries (see
/// [`NavEntry::nav_controllers`]).
#[derive(Clone)]
pub struct NavController(Arc<ControllerInner>);

/// Builds a [`NavController`].
pub struct NavControllerBuilder {
    key: Option<String>,
    saveable: bool,
    parent: Option<NavController>,
    destinations: Option<Vec<DestinationRef>>,
    start: Option<NavTarget>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl NavControllerBuilder {
    /// Identity used for parent lookup and saved-state matching.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Whether the controller is saved with its owning entry. Defaults to true.
    pub fn saveable(mut self, saveable: bool) -> Self {
        self.saveable = saveable;
        self
    }

    /// The controller `back` delegates to when this one cannot go back. Also the default source
    /// of entry ids.
    pub fn parent(mut self, parent: &NavController) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Declares the destinations this controller can navigate to.
    pub fn destinations<I>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = DestinationRef>,
    {
        self.destinations = Some(destinations.into_iter().collect());
        self
    }

    /// The first entry. Must be one of the declared destinations.
    pub fn start(mut self, start: impl Into<NavTarget>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Builds the controller, failing on duplicate destination names or an undeclared start
    /// destination.
    pub fn build(self) -> Result<NavController, NavError> {
        let destinations = self.destinations.map(Destinations::new).transpose()?;
        let ids = self
            .ids
            .or_else(|| self.parent.as_ref().map(NavController::id_generator))
            .unwrap_or_else(|| Arc::new(RandomIds));
        let controller = NavController::from_parts(
            self.key,
            self.saveable,
            self.parent.as_ref(),
            ids,
            destinations,
        );
        if let Some(start) = self.start {
            controller.navigate(start)?;
        }
        Ok(controller)
    }
}

impl NavController {
    pub fn builder() -> NavControllerBuilder {
        NavControllerBuilder {
            key: None,
            saveable: true,
            parent: None,
            destinations: None,
            start: None,
            ids: None,
        }
    }

    fn from_parts(
        key: Option<String>,
        saveable: bool,
        parent: Option<&NavController>,
        ids: Arc<dyn IdGenerator>,
        destinations: Option<Destinations>,
    ) -> NavController {
        NavController(Arc::new(ControllerInner {
            key,
            saveable,
            parent: parent.map_or_else(Weak::new, |p| Arc::downgrade(&p.0)),
            ids,
            destinations: Mutex::new(destinations),
            stack: Mutex::new(Stack {
                current: None,
                back_stack: Vec::new(),
                transition: None,
                closed: false,
            }),
            observers: Mutex::new(Observers::default()),
            shared_view_models: ViewModelsStorage::new(),
        }))
    }

    /// Builds a child controller for `entry` (or returns the existing or restored one under `key`).
    ///
    /// The child is parented to this controller and shares its id generator.
    pub fn child_controller<F>(
        &self,
        entry: &NavEntry,
        key: &str,
        configure: F,
    ) -> Result<NavController, NavError>
    where
        F: FnOnce(NavControllerBuilder) -> NavControllerBuilder,
    {
        entry.nav_controllers().get_or_create(key, || {
            configure(NavController::builder().key(key).parent(self)).build()
        })
    }

    pub fn key(&self) -> Option<&str> {
        self.0.key.as_deref()
    }

    pub fn is_saveable(&self) -> bool {
        self.0.saveable
    }

    pub fn parent(&self) -> Option<NavController> {
        self.0.parent.upgrade().map(NavController)
    }

    /// The closest ancestor with the given key.
    pub fn find_parent(&self, key: &str) -> Option<NavController> {
        let mut next = self.parent();
        while let Some(controller) = next {
            if controller.key() == Some(key) {
                return Some(controller);
            }
            next = controller.parent();
        }
        None
    }

    /// The topmost ancestor, or this controller if it has no parent.
    pub fn root(&self) -> NavController {
        let mut root = self.clone();
        while let Some(parent) = root.parent() {
            root = parent;
        }
        root
    }

    pub fn id_generator(&self) -> Arc<dyn IdGenerator> {
        Arc::clone(&self.0.ids)
    }

    /// Destination of the current entry.
    pub fn current(&self) -> Option<DestinationRef> {
        self.current_entry().map(|entry| entry.destination())
    }

    pub fn current_entry(&self) -> Option<NavEntry> {
        self.0.stack.lock().current.clone()
    }

    pub fn can_go_back(&self) -> bool {
        !self.0.stack.lock().back_stack.is_empty()
    }

    /// The back stack, bottom to top. Does not include the current entry.
    pub fn back_stack(&self) -> Vec<NavEntry> {
        self.0.stack.lock().back_stack.clone()
    }

    /// The latest transition.
    pub fn current_transition(&self) -> Option<Transition> {
        self.0.stack.lock().transition.clone()
    }

    /// The declared destinations, if any have been declared yet.
    pub fn destinations(&self) -> Option<Destinations> {
        self.0.destinations.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.stack.lock().closed
    }

    /// View models shared by all entries of this controller. Cleared on close.
    pub fn shared_view_models(&self) -> &ViewModelsStorage {
        &self.0.shared_view_models
    }

    /// Registers a listener called once per successful navigation.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        let mut observers = self.0.observers.lock();
        let id = ListenerId(observers.next_listener);
        observers.next_listener += 1;
        observers.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut observers = self.0.observers.lock();
        let len = observers.listeners.len();
        observers.listeners.retain(|(listener, _)| *listener != id);
        observers.listeners.len() != len
    }

    /// A stream of transitions. Dropping the receiver unsubscribes.
    pub fn subscribe_transitions(&self) -> Receiver<Transition> {
        let (sender, receiver) = channel::unbounded();
        self.0.observers.lock().transitions.push(sender);
        receiver
    }

    /// A stream of back stack snapshots, sent after every change. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe_back_stack(&self) -> Receiver<Vec<NavEntry>> {
        let (sender, receiver) = channel::unbounded();
        self.0.observers.lock().back_stacks.push(sender);
        receiver
    }

    /// Creates an entry for a destination target; returns entry targets as they are.
    ///
    /// Fails if the destination is not declared.
    pub fn create_entry(&self, target: impl Into<NavTarget>) -> Result<NavEntry, NavError> {
        match target.into() {
            NavTarget::Entry(entry) => {
                self.check_declared(&entry.destination_name())?;
                Ok(entry)
            }
            NavTarget::Destination { destination, args } => {
                let declared = self.check_declared(destination.name())?;
                Ok(NavEntry::with_id(self.0.ids.next_id(), declared, args))
            }
        }
    }

    /// Returns the declared destination with the given name.
    fn check_declared(&self, name: &str) -> Result<DestinationRef, NavError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.0
            .destinations
            .lock()
            .as_ref()
            .and_then(|destinations| destinations.get(name).cloned())
            .ok_or_else(|| NavError::UnknownDestination {
                name: name.to_string(),
                controller: self.0.key.clone(),
            })
    }

    fn closed_error(&self) -> NavError {
        NavError::Closed {
            controller: self.0.key.clone(),
        }
    }

    /// Pushes the current entry onto the back stack and makes the target current.
    pub fn navigate(&self, target: impl Into<NavTarget>) -> Result<(), NavError> {
        self.push_or_replace(target.into(), None, false)
    }

    pub fn navigate_with(
        &self,
        target: impl Into<NavTarget>,
        data: TransitionData,
    ) -> Result<(), NavError> {
        self.push_or_replace(target.into(), Some(data), false)
    }

    /// Like [`NavController::navigate`], but the current entry is detached instead of pushed.
    pub fn replace(&self, target: impl Into<NavTarget>) -> Result<(), NavError> {
        self.push_or_replace(target.into(), None, true)
    }

    pub fn replace_with(
        &self,
        target: impl Into<NavTarget>,
        data: TransitionData,
    ) -> Result<(), NavError> {
        self.push_or_replace(target.into(), Some(data), true)
    }

    fn push_or_replace(
        &self,
        target: NavTarget,
        data: Option<TransitionData>,
        replace: bool,
    ) -> Result<(), NavError> {
        let entry = self.create_entry(target)?;
        entry.ensure_detached_and_attach()?;

        let (transition, replaced) = {
            let mut stack = self.0.stack.lock();
            if stack.closed {
                drop(stack);
                entry.detach_from_controller();
                return Err(self.closed_error());
            }
            let previous = stack.current.replace(entry.clone());
            let replaced = match &previous {
                Some(previous) if !replace => {
                    stack.back_stack.push(previous.clone());
                    None
                }
                _ => previous.clone(),
            };
            let transition = Transition {
                from: previous,
                to: Some(entry.clone()),
                is_forward: true,
                data,
            };
            stack.transition = Some(transition.clone());
            (transition, replaced)
        };

        tracing::debug!(
            controller = ?self.0.key,
            from = ?transition.from.as_ref().map(NavEntry::destination_name),
            to = %entry.destination_name(),
            replace,
            "navigated"
        );
        if let Some(replaced) = replaced {
            replaced.detach_from_controller();
        }
        self.publish(Some(transition));
        Ok(())
    }

    /// Brings the destination to the top: a no-op if it is current, a reorder if it is in the back
    /// stack, a plain navigate otherwise.
    pub fn pop_to_top(&self, target: impl Into<NavTarget>) -> Result<bool, NavError> {
        self.pop_to_top_with(PopToTop::new(target))
    }

    pub fn pop_to_top_with(&self, request: PopToTop) -> Result<bool, NavError> {
        let PopToTop {
            target,
            transition: data,
            or_else,
        } = request;
        let name = target.destination_name();

        let transition = {
            let mut stack = self.0.stack.lock();
            if stack.closed {
                return Err(self.closed_error());
            }
            let is_current = stack
                .current
                .as_ref()
                .map_or(false, |current| current.destination_name() == name);
            if is_current {
                return Ok(true);
            }
            match stack
                .back_stack
                .iter()
                .rposition(|entry| entry.destination_name() == name)
            {
                Some(index) => {
                    let found = stack.back_stack.remove(index);
                    let previous = stack.current.replace(found.clone());
                    if let Some(previous) = &previous {
                        stack.back_stack.push(previous.clone());
                    }
                    let transition = Transition {
                        from: previous,
                        to: Some(found),
                        is_forward: true,
                        data: data.clone(),
                    };
                    stack.transition = Some(transition.clone());
                    Some(transition)
                }
                None => None,
            }
        };

        match transition {
            Some(transition) => {
                tracing::debug!(controller = ?self.0.key, to = %name, "popped to top");
                self.publish(Some(transition));
                Ok(true)
            }
            None => match or_else {
                Some(or_else) => or_else(self, target),
                None => {
                    self.push_or_replace(target, data, false)?;
                    Ok(true)
                }
            },
        }
    }

    /// Goes back to the top of the back stack.
    ///
    /// Delegates to the parent when there is nothing to go back to; returns false if no controller
    /// up the chain can go back.
    pub fn back(&self) -> bool {
        self.back_with(Back::new())
    }

    pub fn back_with(&self, request: Back) -> bool {
        let Back {
            to,
            result,
            inclusive,
            transition: data,
            or_else,
        } = request;

        let outcome = {
            let mut stack = self.0.stack.lock();
            let target_index = if stack.closed {
                None
            } else {
                match &to {
                    None => stack.back_stack.len().checked_sub(1),
                    Some(name) => stack
                        .back_stack
                        .iter()
                        .rposition(|entry| entry.destination_name() == *name)
                        .and_then(|index| {
                            if inclusive {
                                index.checked_sub(1)
                            } else {
                                Some(index)
                            }
                        }),
                }
            };
            target_index.map(|index| {
                let mut removed: Vec<NavEntry> = stack.back_stack.drain(index + 1..).rev().collect();
                let target = stack.back_stack.remove(index);
                let previous = stack.current.replace(target.clone());
                if let Some(previous) = &previous {
                    removed.insert(0, previous.clone());
                }
                let transition = Transition {
                    from: previous,
                    to: Some(target.clone()),
                    is_forward: false,
                    data: data.clone(),
                };
                stack.transition = Some(transition.clone());
                (target, removed, transition)
            })
        };

        match outcome {
            Some((target, removed, transition)) => {
                tracing::debug!(
                    controller = ?self.0.key,
                    to = %target.destination_name(),
                    removed = removed.len(),
                    "navigated back"
                );
                target.set_nav_result(result);
                for entry in removed {
                    entry.detach_from_controller();
                }
                self.publish(Some(transition));
                true
            }
            None => match or_else {
                Some(or_else) => or_else(self),
                None => match self.parent() {
                    Some(parent) => parent.back_with(Back {
                        to,
                        result,
                        inclusive,
                        transition: data,
                        or_else: None,
                    }),
                    None => {
                        tracing::warn!(controller = ?self.0.key, ?to, "cannot go back");
                        false
                    }
                },
            },
        }
    }

    /// Edits the back stack.
    ///
    /// Inserted entries must not belong to a controller, unless they were removed earlier in the
    /// same edit. Removed entries are detached after the edited stack is in place, so teardown
    /// hooks that navigate see the new stack. Emits a back stack update but no transition. Do not
    /// navigate from inside `edit`.
    pub fn edit_back_stack<R, F>(&self, edit: F) -> R
    where
        F: FnOnce(&mut BackStackEditor<'_>) -> R,
    {
        let entries = self.back_stack();
        let mut editor = BackStackEditor {
            controller: self,
            entries,
            removed: Vec::new(),
        };
        let result = edit(&mut editor);
        let BackStackEditor {
            entries, removed, ..
        } = editor;
        let len = entries.len();
        self.0.stack.lock().back_stack = entries;
        tracing::debug!(controller = ?self.0.key, len, removed = removed.len(), "edited back stack");
        for entry in removed {
            entry.detach_from_controller();
        }
        self.publish(None);
        result
    }

    /// Follows a route, descending into child controllers as the route says.
    ///
    /// Destination steps navigate to a fresh entry, except when the step names the destination
    /// that is already current with the same arguments (or with none given). That entry is kept,
    /// along with the child controllers a following controller step descends into. With
    /// [`FailStrategy::Throw`] nothing is changed if any step is unresolvable; with
    /// [`FailStrategy::Ignore`] the resolvable prefix is followed.
    pub fn route(&self, route: &Route) -> Result<(), NavError> {
        let (plan, failure) = self.plan_route(route);
        if let Some(err) = failure {
            match route.fail_strategy() {
                FailStrategy::Throw => return Err(err),
                FailStrategy::Ignore => {
                    tracing::debug!(controller = ?self.0.key, error = %err, "ignoring rest of route")
                }
            }
        }
        for (controller, target) in plan {
            controller.navigate(target)?;
        }
        Ok(())
    }

    /// Resolves route steps without changing anything. Returns the jumps to make and the first
    /// failure, if any.
    fn plan_route(&self, route: &Route) -> (Vec<(NavController, NavTarget)>, Option<NavError>) {
        let mut plan = Vec::new();
        let mut controller = self.clone();
        // the entry that will be current in `controller` once the planned jumps are made;
        // None if there is none yet or it will be freshly created (and so has no children)
        let mut current = controller.current_entry();

        for step in route.steps() {
            match step {
                RouteStep::Destination { name, args } => {
                    let destination = match controller.check_declared(name) {
                        Ok(destination) => destination,
                        Err(_) => return (plan, Some(unresolved(&controller, step))),
                    };
                    let keep = current.as_ref().map_or(false, |entry| {
                        entry.destination_name() == *name && same_args(entry, args.as_ref())
                    });
                    if !keep {
                        current = None;
                        plan.push((
                            controller.clone(),
                            NavTarget::Destination {
                                destination,
                                args: args.clone(),
                            },
                        ));
                    }
                }
                RouteStep::Controller { key } => {
                    match current.as_ref().and_then(|entry| entry.nav_controllers().get(key)) {
                        Some(child) => {
                            current = child.current_entry();
                            controller = child;
                        }
                        None => return (plan, Some(unresolved(&controller, step))),
                    }
                }
            }
        }
        (plan, None)
    }

    /// Declares destinations after construction (typically after a restore) and resolves every
    /// entry against them.
    ///
    /// Fails without changing anything on duplicate names or an entry whose destination is not
    /// among them.
    pub fn set_destinations<I>(&self, destinations: I) -> Result<(), NavError>
    where
        I: IntoIterator<Item = DestinationRef>,
    {
        let destinations = Destinations::new(destinations)?;
        let lookup = |name: &str| destinations.get(name).cloned();
        self.check_resolvable(&lookup)?;
        self.resolve_entries(&lookup)?;
        *self.0.destinations.lock() = Some(destinations);
        Ok(())
    }

    /// Resolves restored entries through a lookup, without declaring destinations.
    pub fn resolve_destinations<F>(&self, resolver: F) -> Result<(), NavError>
    where
        F: Fn(&str) -> Option<DestinationRef>,
    {
        self.check_resolvable(&resolver)?;
        self.resolve_entries(&resolver)
    }

    fn all_entries(&self) -> Vec<NavEntry> {
        let stack = self.0.stack.lock();
        stack
            .back_stack
            .iter()
            .chain(stack.current.iter())
            .cloned()
            .collect()
    }

    fn check_resolvable(&self, lookup: &dyn Fn(&str) -> Option<DestinationRef>) -> Result<(), NavError> {
        for entry in self.all_entries() {
            if !entry.is_resolved() {
                let name = entry.destination_name();
                if lookup(&name).is_none() {
                    return Err(NavError::UnknownDestination {
                        name,
                        controller: self.0.key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_entries(&self, lookup: &dyn Fn(&str) -> Option<DestinationRef>) -> Result<(), NavError> {
        for entry in self.all_entries() {
            entry.resolve_in(lookup, self.key())?;
        }
        Ok(())
    }

    /// Detaches the current entry and every back stack entry. Idempotent.
    pub fn close(&self) {
        let entries = {
            let mut stack = self.0.stack.lock();
            if stack.closed {
                return;
            }
            stack.closed = true;
            stack.transition = None;
            let mut entries: Vec<NavEntry> = stack.current.take().into_iter().collect();
            entries.extend(stack.back_stack.drain(..).rev());
            entries
        };
        tracing::debug!(controller = ?self.0.key, entries = entries.len(), "closing controller");
        for entry in entries {
            entry.detach_from_controller();
        }
        self.0.shared_view_models.clear();
        self.publish(None);
    }

    /// Saves the controller tree.
    ///
    /// Layout: `{key, saveable, current, backStack}`.
    pub fn save_to_saved_state(&self) -> Result<SavedState, SaveError> {
        let (current, back_stack) = {
            let stack = self.0.stack.lock();
            (stack.current.clone(), stack.back_stack.clone())
        };
        let key = self.key();
        let current = match current {
            Some(entry) => SavedValue::State(entry.save_to_saved_state(key)?),
            None => SavedValue::Null,
        };
        let back_stack = back_stack
            .iter()
            .map(|entry| entry.save_to_saved_state(key).map(SavedValue::State))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(controller = ?key, entries = back_stack.len() + usize::from(!current.is_null()), "saved controller");
        Ok(SavedState::new()
            .with("key", key)
            .with("saveable", self.0.saveable)
            .with("current", current)
            .with("backStack", back_stack))
    }

    /// Rebuilds a controller from [`NavController::save_to_saved_state`] output.
    ///
    /// Entries start with placeholder destinations; declare the real ones with
    /// [`NavController::set_destinations`]. On failure nothing is kept, and the caller should fall
    /// back to a fresh controller.
    pub fn restore_from_saved_state(
        parent: Option<&NavController>,
        state: &SavedState,
    ) -> Result<NavController, RestoreError> {
        let result = NavController::restore_at(parent, state, "");
        if let Err(err) = &result {
            tracing::warn!(error = %err, "failed to restore controller");
        }
        result
    }

    pub(crate) fn restore_at(
        parent: Option<&NavController>,
        state: &SavedState,
        path: &str,
    ) -> Result<NavController, RestoreError> {
        let key = state.optional_str("key", path)?.map(str::to_string);
        let path = format!("{}/{}", path, key.as_deref().unwrap_or("<unkeyed>"));
        let saveable = state.require_bool("saveable", &path)?;
        let ids = parent.map_or_else(|| Arc::new(RandomIds) as Arc<dyn IdGenerator>, NavController::id_generator);
        let controller = NavController::from_parts(key, saveable, parent, ids, None);

        let current = match state.optional_state("current", &path)? {
            Some(entry) => Some(NavEntry::restore_from_saved_state(
                &controller,
                entry,
                &format!("{}/current", path),
            )?),
            None => None,
        };
        let mut back_stack = Vec::new();
        for (i, value) in state.require_list("backStack", &path)?.iter().enumerate() {
            let entry_path = format!("{}/backStack[{}]", path, i);
            match value {
                SavedValue::State(entry) => back_stack.push(NavEntry::restore_from_saved_state(
                    &controller,
                    entry,
                    &entry_path,
                )?),
                other => {
                    return Err(RestoreError::WrongType {
                        key: i.to_string(),
                        expected: "state",
                        found: other.kind(),
                        path: entry_path,
                    })
                }
            }
        }

        for entry in back_stack.iter().chain(current.iter()) {
            entry.attach_restored();
        }
        {
            let mut stack = controller.0.stack.lock();
            stack.transition = current.as_ref().map(|entry| Transition {
                from: None,
                to: Some(entry.clone()),
                is_forward: true,
                data: None,
            });
            stack.current = current;
            stack.back_stack = back_stack;
        }
        tracing::info!(controller = ?controller.0.key, "restored controller");
        Ok(controller)
    }

    /// Notifies listeners and subscribers. Must be called without holding the stack lock.
    fn publish(&self, transition: Option<Transition>) {
        let back_stack = self.back_stack();
        let listeners: Vec<Listener> = {
            let mut observers = self.0.observers.lock();
            observers
                .back_stacks
                .retain(|sender| sender.send(back_stack.clone()).is_ok());
            if let Some(transition) = &transition {
                observers
                    .transitions
                    .retain(|sender| sender.send(transition.clone()).is_ok());
            }
            observers
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        if let Some(transition) = &transition {
            for listener in listeners {
                listener(transition);
            }
        }
    }
}

/// Whether a route step's arguments match the entry's. Steps without arguments match any entry;
/// otherwise the saved forms are compared.
fn same_args(entry: &NavEntry, args: Option<&Payload>) -> bool {
    let wanted = match args {
        None => return true,
        Some(args) => args.save(),
    };
    match (entry.nav_args_payload().map(|existing| existing.save()), wanted) {
        (Some(Ok(existing)), Ok(wanted)) => existing == wanted,
        _ => false,
    }
}

fn unresolved(controller: &NavController, step: &RouteStep) -> NavError {
    NavError::UnresolvedRoute {
        controller: controller.0.key.clone(),
        step: step.to_string(),
    }
}

impl PartialEq for NavController {
    fn eq(&self, other: &NavController) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for NavController {}

impl fmt::Debug for NavController {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let stack = self.0.stack.lock();
        f.debug_struct("NavController")
            .field("key", &self.0.key)
            .field(
                "current",
                &stack.current.as_ref().map(NavEntry::destination_name),
            )
            .field(
                "back_stack",
                &stack
                    .back_stack
                    .iter()
                    .map(NavEntry::destination_name)
                    .collect::<Vec<_>>(),
            )
            .field("closed", &stack.closed)
            .finish()
    }
}

/// Mutation scope for [`NavController::edit_back_stack`].
///
/// Entries taken out of the stack stay attached until the edit ends.
pub struct BackStackEditor<'a> {
    controller: &'a NavController,
    entries: Vec<NavEntry>,
    removed: Vec<NavEntry>,
}

impl<'a> BackStackEditor<'a> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NavEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NavEntry> {
        self.entries.iter()
    }

    fn attach(&mut self, target: impl Into<NavTarget>) -> Result<NavEntry, NavError> {
        let entry = self.controller.create_entry(target)?;
        // moved within this edit
        if let Some(index) = self.removed.iter().position(|removed| *removed == entry) {
            return Ok(self.removed.remove(index));
        }
        entry.ensure_detached_and_attach()?;
        Ok(entry)
    }

    fn check_index(&self, index: usize, len: usize) -> Result<(), NavError> {
        if index < len {
            Ok(())
        } else {
            Err(NavError::IndexOutOfBounds {
                index,
                len: self.entries.len(),
            })
        }
    }

    /// Adds an entry on top. Returns the entry (created if the target was a destination).
    pub fn push(&mut self, target: impl Into<NavTarget>) -> Result<NavEntry, NavError> {
        let entry = self.attach(target)?;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn insert(&mut self, index: usize, target: impl Into<NavTarget>) -> Result<NavEntry, NavError> {
        self.check_index(index, self.entries.len() + 1)?;
        let entry = self.attach(target)?;
        self.entries.insert(index, entry.clone());
        Ok(entry)
    }

    /// Replaces the entry at `index`. Returns the old entry.
    pub fn set(&mut self, index: usize, target: impl Into<NavTarget>) -> Result<NavEntry, NavError> {
        self.check_index(index, self.entries.len())?;
        let entry = self.attach(target)?;
        let old = std::mem::replace(&mut self.entries[index], entry);
        self.removed.push(old.clone());
        Ok(old)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<NavEntry, NavError> {
        self.check_index(index, self.entries.len())?;
        let entry = self.entries.remove(index);
        self.removed.push(entry.clone());
        Ok(entry)
    }

    /// Removes the top entry.
    pub fn pop(&mut self) -> Option<NavEntry> {
        let entry = self.entries.pop()?;
        self.removed.push(entry.clone());
        Some(entry)
    }

    /// Removes every entry matching `predicate`. Returns how many were removed.
    pub fn remove_all<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&NavEntry) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|entry| predicate(entry));
        self.entries = kept;
        let count = removed.len();
        self.removed.extend(removed);
        count
    }

    pub fn clear(&mut self) {
        let entries: Vec<_> = self.entries.drain(..).rev().collect();
        self.removed.extend(entries);
    }
}
