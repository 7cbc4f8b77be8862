//! Type-erased values carried by entries.
//!
//! Destinations know the argument type they expect, but the stack stores entries of many
//! destinations side by side, so arguments and results are boxed into a [`Payload`] and
//! recovered with a typed accessor. A payload restored from saved state only has its
//! [`SavedValue`] until the first typed access decodes it.

use crate::saved_state::SavedValue;
use core::any::{type_name, Any};
use core::fmt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

type Encoder = Box<dyn Fn() -> Result<SavedValue, serde_json::Error> + Send + Sync>;

enum Repr {
    Live {
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
        /// None for transient payloads.
        encode: Option<Encoder>,
    },
    Restored {
        saved: SavedValue,
        decoded: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    },
}

/// A cheaply cloneable, type-erased value.
#[derive(Clone)]
pub struct Payload(Arc<Repr>);

/// Why a payload could not be saved.
#[derive(Debug)]
pub(crate) enum PayloadSaveError {
    Transient(&'static str),
    Encode(serde_json::Error),
}

impl Payload {
    /// Wraps a serializable value. The payload can be saved and restored.
    pub fn new<T>(value: T) -> Payload
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let value = Arc::new(value);
        let for_encoder = Arc::clone(&value);
        Payload(Arc::new(Repr::Live {
            value,
            type_name: type_name::<T>(),
            encode: Some(Box::new(move || SavedValue::encode(&*for_encoder))),
        }))
    }

    /// Wraps a value that only lives as long as the process.
    ///
    /// Saving an entry that holds a transient payload is an error.
    pub fn transient<T: Any + Send + Sync>(value: T) -> Payload {
        Payload(Arc::new(Repr::Live {
            value: Arc::new(value),
            type_name: type_name::<T>(),
            encode: None,
        }))
    }

    pub(crate) fn restored(saved: SavedValue) -> Payload {
        Payload(Arc::new(Repr::Restored {
            saved,
            decoded: Mutex::new(None),
        }))
    }

    /// Returns the value as `T`, decoding it first if it was restored from saved state.
    ///
    /// Returns None if the payload holds some other type.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        match &*self.0 {
            Repr::Live { value, .. } => Arc::clone(value).downcast::<T>().ok(),
            Repr::Restored { saved, decoded } => {
                let mut decoded = decoded.lock();
                if let Some(value) = &*decoded {
                    if let Ok(value) = Arc::clone(value).downcast::<T>() {
                        return Some(value);
                    }
                }
                let value = Arc::new(saved.decode::<T>().ok()?);
                if decoded.is_none() {
                    *decoded = Some(Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
                }
                Some(value)
            }
        }
    }

    /// Returns the value as `T` without decoding. Works for transient payloads.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match &*self.0 {
            Repr::Live { value, .. } => Arc::clone(value).downcast::<T>().ok(),
            Repr::Restored { decoded, .. } => {
                let decoded = decoded.lock();
                decoded.as_ref().and_then(|v| Arc::clone(v).downcast::<T>().ok())
            }
        }
    }

    /// Whether this payload can be saved.
    pub fn is_saveable(&self) -> bool {
        match &*self.0 {
            Repr::Live { encode, .. } => encode.is_some(),
            Repr::Restored { .. } => true,
        }
    }

    /// The saved form, if the payload was restored and has not been replaced.
    pub fn saved_value(&self) -> Option<&SavedValue> {
        match &*self.0 {
            Repr::Restored { saved, .. } => Some(saved),
            Repr::Live { .. } => None,
        }
    }

    pub(crate) fn save(&self) -> Result<SavedValue, PayloadSaveError> {
        match &*self.0 {
            Repr::Live {
                encode: Some(encode),
                ..
            } => encode().map_err(PayloadSaveError::Encode),
            Repr::Live {
                encode: None,
                type_name,
                ..
            } => Err(PayloadSaveError::Transient(type_name)),
            Repr::Restored { saved, .. } => Ok(saved.clone()),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.0 {
            Repr::Live {
                type_name, encode, ..
            } => {
                if encode.is_some() {
                    write!(f, "Payload<{}>", type_name)
                } else {
                    write!(f, "Payload<{}, transient>", type_name)
                }
            }
            Repr::Restored { saved, .. } => write!(f, "Payload(restored {:?})", saved),
        }
    }
}

/// Opaque data passed through to the renderer with a transition (e.g. which animation to use).
#[derive(Clone)]
pub struct TransitionData(Arc<dyn Any + Send + Sync>);

impl TransitionData {
    pub fn new<T: Any + Send + Sync>(data: T) -> TransitionData {
        TransitionData(Arc::new(data))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for TransitionData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TransitionData(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Article {
        id: u32,
        title: String,
    }

    #[test]
    fn typed_access_checks_the_type() {
        let payload = Payload::new(Article {
            id: 7,
            title: "Perching".into(),
        });
        assert_eq!(payload.get::<Article>().map(|a| a.id), Some(7));
        assert!(payload.get::<String>().is_none(), "wrong type should give None");
    }

    #[test]
    fn restored_payload_decodes_lazily() {
        let original = Article {
            id: 3,
            title: "Nests".into(),
        };
        let saved = Payload::new(original.clone()).save().unwrap();
        let restored = Payload::restored(saved);

        assert!(
            restored.downcast::<Article>().is_none(),
            "nothing is decoded before the first typed access"
        );
        let first = restored.get::<Article>().unwrap();
        assert_eq!(*first, original);
        let again = restored.downcast::<Article>().unwrap();
        assert!(Arc::ptr_eq(&first, &again), "decoded value should be cached");
    }

    #[test]
    fn transient_payloads_refuse_to_save() {
        struct Handle;
        let payload = Payload::transient(Handle);
        assert!(!payload.is_saveable());
        assert!(payload.downcast::<Handle>().is_some());
        match payload.save() {
            Err(PayloadSaveError::Transient(name)) => assert!(name.ends_with("Handle")),
            other => panic!("expected a transient error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn transition_data_is_opaque_but_downcastable() {
        let data = TransitionData::new("slide");
        assert_eq!(data.downcast_ref::<&str>(), Some(&"slide"));
        assert!(data.downcast_ref::<u8>().is_none());
    }
}
