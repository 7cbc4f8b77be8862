//! Deep-link routes.
//!
//! A route is a sequence of steps, each either "go to this destination" or "descend into this
//! child controller of the current entry". [`NavController::route`](crate::NavController::route)
//! follows it from the controller it is called on.
//!
//! ```text
//! Route::builder()
//!     .destination("library")         // root: library
//!     .controller("library-tabs")     // descend into library's tab controller
//!     .destination_with("album", id)  // tabs: album(id)
//!     .build()
//! ```

use crate::payload::Payload;
use core::fmt;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// What to do when a route step cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailStrategy {
    /// Follow the resolvable prefix, drop the rest.
    Ignore,
    /// Fail without navigating at all.
    #[default]
    Throw,
}

#[derive(Debug, Clone)]
pub enum RouteStep {
    /// Navigate to a destination of the current controller. A current entry of the same
    /// destination is kept when `args` is None or equal to its arguments.
    Destination { name: String, args: Option<Payload> },
    /// Continue in the child controller stored under `key` in the current entry.
    Controller { key: String },
}

impl fmt::Display for RouteStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RouteStep::Destination { name, .. } => write!(f, "destination {}", name),
            RouteStep::Controller { key } => write!(f, "controller {}", key),
        }
    }
}

/// An immutable sequence of route steps.
#[derive(Debug, Clone, Default)]
pub struct Route {
    steps: Vec<RouteStep>,
    fail_strategy: FailStrategy,
}

impl Route {
    pub fn builder() -> RouteBuilder {
        RouteBuilder::default()
    }

    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    pub fn fail_strategy(&self) -> FailStrategy {
        self.fail_strategy
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Builds a [`Route`].
#[derive(Debug, Default)]
pub struct RouteBuilder {
    steps: Vec<RouteStep>,
    fail_strategy: FailStrategy,
}

impl RouteBuilder {
    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.steps.push(RouteStep::Destination {
            name: name.into(),
            args: None,
        });
        self
    }

    pub fn destination_with<A>(mut self, name: impl Into<String>, args: A) -> Self
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.steps.push(RouteStep::Destination {
            name: name.into(),
            args: Some(Payload::new(args)),
        });
        self
    }

    pub fn controller(mut self, key: impl Into<String>) -> Self {
        self.steps.push(RouteStep::Controller { key: key.into() });
        self
    }

    pub fn fail_strategy(mut self, fail_strategy: FailStrategy) -> Self {
        self.fail_strategy = fail_strategy;
        self
    }

    pub fn build(self) -> Route {
        Route {
            steps: self.steps,
            fail_strategy: self.fail_strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_step_order() {
        let route = Route::builder()
            .destination("library")
            .controller("tabs")
            .destination_with("album", 12u32)
            .build();
        assert_eq!(
            route.to_string(),
            "destination library -> controller tabs -> destination album"
        );
        assert_eq!(route.fail_strategy(), FailStrategy::Throw);
        match &route.steps()[2] {
            RouteStep::Destination { args: Some(args), .. } => {
                assert_eq!(args.get::<u32>().as_deref(), Some(&12))
            }
            other => panic!("expected album with args, got {:?}", other),
        }
    }
}
