use crate::controller::NavTarget;
use crate::error::NavError;
use crate::payload::Payload;
use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// Destinations are the screens a controller can navigate between.
///
/// A destination is an identity: its name must be unique among the destinations declared for a
/// controller, and it is the only thing about a destination that gets saved. How a destination
/// renders its content is up to the UI layer, which can downcast via [`Destination::as_any`].
///
/// Destinations are usually created once and shared (see [`NavDestination`]).
pub trait Destination: Any + fmt::Debug + Send + Sync {
    /// The destination name.
    fn name(&self) -> &str;

    /// For downcasting.
    fn as_any(&self) -> &dyn Any;

    /// False for the placeholders entries carry between a restore and destination resolution.
    fn is_resolved(&self) -> bool {
        true
    }
}

pub type DestinationRef = Arc<dyn Destination>;

/// A destination that takes arguments of type `A`.
pub struct NavDestination<A = ()> {
    name: Cow<'static, str>,
    _args: PhantomData<fn() -> A>,
}

impl<A> NavDestination<A> {
    pub fn new(name: impl Into<Cow<'static, str>>) -> NavDestination<A> {
        NavDestination {
            name: name.into(),
            _args: PhantomData,
        }
    }

    /// Creates a shared destination.
    pub fn shared(name: impl Into<Cow<'static, str>>) -> Arc<NavDestination<A>> {
        Arc::new(NavDestination::new(name))
    }
}

impl<A> NavDestination<A>
where
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// A navigation target for this destination with typed arguments.
    pub fn with_args(self: &Arc<Self>, args: A) -> NavTarget {
        NavTarget::Destination {
            destination: Arc::clone(self) as DestinationRef,
            args: Some(Payload::new(args)),
        }
    }
}

impl<A> fmt::Debug for NavDestination<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NavDestination({:?})", self.name)
    }
}

impl<A: 'static> Destination for NavDestination<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Stand-in for a destination that is only known by name, as after a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDestination {
    pub name: String,
}

impl Destination for UnresolvedDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_resolved(&self) -> bool {
        false
    }
}

/// The set of destinations declared for a controller, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Destinations {
    by_name: IndexMap<String, DestinationRef>,
}

impl Destinations {
    /// Collects destinations, failing on the first duplicate name.
    pub fn new<I>(destinations: I) -> Result<Destinations, NavError>
    where
        I: IntoIterator<Item = DestinationRef>,
    {
        let mut by_name = IndexMap::new();
        for destination in destinations {
            let name = destination.name().to_string();
            if by_name.contains_key(&name) {
                return Err(NavError::DuplicateDestination { name });
            }
            by_name.insert(name, destination);
        }
        Ok(Destinations { by_name })
    }

    pub fn get(&self, name: &str) -> Option<&DestinationRef> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DestinationRef> {
        self.by_name.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let home: DestinationRef = NavDestination::<()>::shared("home");
        let other_home: DestinationRef = NavDestination::<u32>::shared("home");
        let settings: DestinationRef = NavDestination::<()>::shared("settings");

        let err = Destinations::new(vec![home.clone(), settings, other_home]).unwrap_err();
        assert_eq!(
            err,
            NavError::DuplicateDestination {
                name: "home".into()
            }
        );

        let declared = Destinations::new(vec![home]).unwrap();
        assert!(declared.contains("home"));
        assert!(!declared.contains("settings"));
    }

    #[test]
    fn placeholders_are_unresolved() {
        let placeholder = UnresolvedDestination {
            name: "profile".into(),
        };
        assert!(!placeholder.is_resolved());
        assert!(NavDestination::<()>::new("profile").is_resolved());
    }
}
