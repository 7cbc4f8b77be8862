//! Navigation for declarative UIs.
//!
//! # Conceptual overview
//! Perch manages which screen is shown, what came before it, and what state each screen keeps
//! while it is off screen. It does not render anything: a UI layer reads the controller's
//! transitions and back stack and draws them however it likes.
//!
//! ## Destinations and entries
//! A [`Destination`] is a screen identity with a unique name. Navigating to a destination creates
//! a [`NavEntry`]: one occurrence of that destination on a stack, with its arguments, the result
//! handed back to it, a snapshot of its UI state, its view models, and any child controllers.
//! The same destination can appear on a stack several times; each occurrence is a separate entry
//! with its own [`EntryId`].
//!
//! ## Controllers
//! A [`NavController`] owns a back stack and a current entry. `navigate` pushes the current entry
//! and makes a new one current, `replace` discards the current entry instead, `pop_to_top`
//! reorders an existing entry to the top, and `back` pops back to an earlier entry. Every
//! successful operation produces a [`Transition`] (from, to, direction, and opaque
//! [`TransitionData`] for the renderer), which listeners and subscribers receive synchronously.
//!
//! Controllers nest: an entry may own child controllers (for tabs, or a flow inside a screen).
//! A child keeps a weak reference to its parent, and `back` on a child that has nothing left to
//! go back to delegates to the parent.
//!
//! ## Entry lifecycle
//! An entry is attached along two independent dimensions: it is on a controller's stack, and it is
//! on screen. These don't change together: an entry that was just popped is still on screen while
//! its exit animation runs, and an entry deeper in the back stack is off screen but still on the
//! stack. An entry is torn down (view models closed, child controllers closed) exactly once, when
//! it leaves the last of the two.
//!
//! ## Saved state
//! A controller tree can be flattened into a [`SavedState`], a plain string-keyed tree, and
//! rebuilt from it after the process restarts. Destinations are saved by name only; a restored
//! controller's entries hold placeholders until the UI declares its destinations again with
//! [`NavController::set_destinations`]. Arguments and results are saved through serde; values
//! that cannot be saved make the save fail loudly instead of being dropped.
//!
//! ## Threading
//! Navigation is expected to happen on one thread (the UI thread), and every operation takes
//! effect before it returns. Handles are `Send + Sync` so they can be moved around, but
//! interleaving navigation from several threads is not supported.

pub mod attachment;
mod controller;
mod destination;
mod entry;
mod error;
mod id;
mod nav_controllers;
mod payload;
pub mod route;
pub mod saved_state;
pub mod view_models;

pub use controller::{
    Back, BackFallback, BackStackEditor, ListenerId, NavController, NavControllerBuilder,
    NavTarget, PopToTop, PopToTopFallback, Transition,
};
pub use destination::{Destination, DestinationRef, Destinations, NavDestination, UnresolvedDestination};
pub use entry::NavEntry;
pub use error::{NavError, RestoreError, SaveError};
pub use id::{EntryId, IdGenerator, RandomIds, SequentialIds};
pub use nav_controllers::NavControllersStorage;
pub use payload::{Payload, TransitionData};
pub use route::{FailStrategy, Route, RouteStep};
pub use saved_state::{SavedState, SavedValue};
pub use view_models::{ViewModel, ViewModelScope, ViewModelsStorage};
