use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A unique identifier for a nav entry.
///
/// (this is just a UUID)
///
/// Stable across save and restore, so it can be used to key content and animations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn from_uuid(uuid: Uuid) -> EntryId {
        EntryId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub(crate) fn parse(s: &str) -> Result<EntryId, uuid::Error> {
        Uuid::parse_str(s).map(EntryId)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Hands out entry ids.
///
/// Controllers hold one of these instead of reaching for a global so tests can swap in
/// [`SequentialIds`].
pub trait IdGenerator: fmt::Debug + Send + Sync {
    fn next_id(&self) -> EntryId;
}

/// Random v4 UUIDs. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> EntryId {
        EntryId(Uuid::new_v4())
    }
}

/// Deterministic ids: `seed`, `seed + 1`, … interpreted as 128-bit UUIDs.
#[derive(Debug)]
pub struct SequentialIds {
    seed: u64,
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new(seed: u64) -> SequentialIds {
        SequentialIds {
            seed,
            counter: AtomicU64::new(0),
        }
    }

    /// Shorthand for a shareable generator.
    pub fn shared(seed: u64) -> Arc<dyn IdGenerator> {
        Arc::new(SequentialIds::new(seed))
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> EntryId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        EntryId(Uuid::from_u128(u128::from(self.seed) + u128::from(n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_are_deterministic() {
        let a = SequentialIds::new(100);
        let b = SequentialIds::new(100);
        let from_a: Vec<_> = (0..3).map(|_| a.next_id()).collect();
        let from_b: Vec<_> = (0..3).map(|_| b.next_id()).collect();
        assert_eq!(from_a, from_b, "same seed should give the same ids");
        assert_eq!(from_a[0], EntryId::from_uuid(Uuid::from_u128(100)));
        assert_eq!(from_a[2], EntryId::from_uuid(Uuid::from_u128(102)));
    }

    #[test]
    fn ids_round_trip_through_text() {
        let id = RandomIds.next_id();
        assert_eq!(EntryId::parse(&id.to_string()).unwrap(), id);
        assert!(EntryId::parse("not-a-uuid").is_err());
    }
}
