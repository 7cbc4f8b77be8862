//! The persistence format.
//!
//! Everything that survives a process restart (controllers, entries, arguments, UI snapshots) is
//! flattened into a [`SavedState`] tree. The host decides how the tree is stored; [`SavedState::to_json`]
//! is provided for hosts that just want bytes.

use crate::error::RestoreError;
use indexmap::IndexMap;
use serde::{ser, Deserialize, Serialize};
use std::fmt;

/// A value in a saved state tree.
///
/// Variant order matters for deserialization: signed integers are tried first, then unsigned
/// ones above `i64::MAX`, then floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SavedValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Always finite; JSON has no representation for NaN or infinities.
    Float(f64),
    String(String),
    List(Vec<SavedValue>),
    State(SavedState),
}

impl SavedValue {
    /// Human-readable variant name, used in restore errors.
    pub fn kind(&self) -> &'static str {
        match self {
            SavedValue::Null => "null",
            SavedValue::Bool(_) => "bool",
            SavedValue::Int(_) => "int",
            SavedValue::UInt(_) => "uint",
            SavedValue::Float(_) => "float",
            SavedValue::String(_) => "string",
            SavedValue::List(_) => "list",
            SavedValue::State(_) => "state",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SavedValue::Null)
    }

    /// Converts any serializable value into a saved value.
    ///
    /// Fails on non-finite floats anywhere in the value instead of storing them as null.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<SavedValue, serde_json::Error> {
        value.serialize(FiniteFloats)?;
        serde_json::to_value(value).and_then(serde_json::from_value)
    }

    /// Converts this value back into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }
}

impl From<bool> for SavedValue {
    fn from(value: bool) -> Self {
        SavedValue::Bool(value)
    }
}

impl From<i64> for SavedValue {
    fn from(value: i64) -> Self {
        SavedValue::Int(value)
    }
}

impl From<u64> for SavedValue {
    fn from(value: u64) -> Self {
        SavedValue::UInt(value)
    }
}

impl From<f64> for SavedValue {
    fn from(value: f64) -> Self {
        SavedValue::Float(value)
    }
}

impl From<String> for SavedValue {
    fn from(value: String) -> Self {
        SavedValue::String(value)
    }
}

impl From<&str> for SavedValue {
    fn from(value: &str) -> Self {
        SavedValue::String(value.to_string())
    }
}

impl From<SavedState> for SavedValue {
    fn from(value: SavedState) -> Self {
        SavedValue::State(value)
    }
}

impl From<Vec<SavedValue>> for SavedValue {
    fn from(value: Vec<SavedValue>) -> Self {
        SavedValue::List(value)
    }
}

impl<T: Into<SavedValue>> From<Option<T>> for SavedValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SavedValue::Null, Into::into)
    }
}

/// An insertion-ordered string-keyed map of saved values.
///
/// Lookups that are part of a restore take a `path` describing where in the tree the state sits,
/// so that a [`RestoreError`] can point at the broken node.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedState {
    entries: IndexMap<String, SavedValue>,
}

impl SavedState {
    pub fn new() -> SavedState {
        SavedState::default()
    }

    /// Inserts a value, returning the previous value for that key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SavedValue>) -> Option<SavedValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SavedValue>) -> SavedState {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&SavedValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<SavedValue> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SavedValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns a value that must be present (it may still be [`SavedValue::Null`]).
    pub fn require(&self, key: &str, path: &str) -> Result<&SavedValue, RestoreError> {
        self.entries.get(key).ok_or_else(|| RestoreError::MissingKey {
            key: key.to_string(),
            path: path.to_string(),
        })
    }

    pub fn require_str(&self, key: &str, path: &str) -> Result<&str, RestoreError> {
        match self.require(key, path)? {
            SavedValue::String(s) => Ok(s),
            other => Err(wrong_type(key, "string", other, path)),
        }
    }

    pub fn require_bool(&self, key: &str, path: &str) -> Result<bool, RestoreError> {
        match self.require(key, path)? {
            SavedValue::Bool(b) => Ok(*b),
            other => Err(wrong_type(key, "bool", other, path)),
        }
    }

    pub fn require_list(&self, key: &str, path: &str) -> Result<&[SavedValue], RestoreError> {
        match self.require(key, path)? {
            SavedValue::List(list) => Ok(list),
            other => Err(wrong_type(key, "list", other, path)),
        }
    }

    /// Returns a string that must be present but may be null.
    pub fn optional_str(&self, key: &str, path: &str) -> Result<Option<&str>, RestoreError> {
        match self.require(key, path)? {
            SavedValue::Null => Ok(None),
            SavedValue::String(s) => Ok(Some(s)),
            other => Err(wrong_type(key, "string or null", other, path)),
        }
    }

    /// Returns a nested state that must be present but may be null.
    pub fn optional_state(&self, key: &str, path: &str) -> Result<Option<&SavedState>, RestoreError> {
        match self.require(key, path)? {
            SavedValue::Null => Ok(None),
            SavedValue::State(state) => Ok(Some(state)),
            other => Err(wrong_type(key, "state or null", other, path)),
        }
    }

    /// Returns a value that must be present, mapping null to `None`.
    pub fn optional_value(&self, key: &str, path: &str) -> Result<Option<&SavedValue>, RestoreError> {
        Ok(match self.require(key, path)? {
            SavedValue::Null => None,
            value => Some(value),
        })
    }

    /// Encodes the tree as JSON. Fails if the tree holds a non-finite float.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        self.serialize(FiniteFloats)?;
        serde_json::to_string(self)
    }

    /// Decodes a tree previously produced by [`SavedState::to_json`].
    pub fn from_json(json: &str) -> Result<SavedState, RestoreError> {
        serde_json::from_str(json).map_err(|source| RestoreError::Decode { source })
    }
}

fn wrong_type(key: &str, expected: &'static str, found: &SavedValue, path: &str) -> RestoreError {
    RestoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.kind(),
        path: path.to_string(),
    }
}

impl fmt::Debug for SavedState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl FromIterator<(String, SavedValue)> for SavedState {
    fn from_iter<I: IntoIterator<Item = (String, SavedValue)>>(iter: I) -> Self {
        SavedState {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Walks a value and fails on the first NaN or infinity. serde_json would write those as null.
#[derive(Clone, Copy)]
struct FiniteFloats;

type CheckResult = Result<(), serde_json::Error>;

impl FiniteFloats {
    fn check(value: f64) -> CheckResult {
        if value.is_finite() {
            Ok(())
        } else {
            Err(ser::Error::custom(format_args!(
                "cannot save non-finite float {}",
                value
            )))
        }
    }
}

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> CheckResult {
        Ok(())
    }
    fn serialize_i8(self, _: i8) -> CheckResult {
        Ok(())
    }
    fn serialize_i16(self, _: i16) -> CheckResult {
        Ok(())
    }
    fn serialize_i32(self, _: i32) -> CheckResult {
        Ok(())
    }
    fn serialize_i64(self, _: i64) -> CheckResult {
        Ok(())
    }
    fn serialize_i128(self, _: i128) -> CheckResult {
        Ok(())
    }
    fn serialize_u8(self, _: u8) -> CheckResult {
        Ok(())
    }
    fn serialize_u16(self, _: u16) -> CheckResult {
        Ok(())
    }
    fn serialize_u32(self, _: u32) -> CheckResult {
        Ok(())
    }
    fn serialize_u64(self, _: u64) -> CheckResult {
        Ok(())
    }
    fn serialize_u128(self, _: u128) -> CheckResult {
        Ok(())
    }
    fn serialize_f32(self, value: f32) -> CheckResult {
        FiniteFloats::check(f64::from(value))
    }
    fn serialize_f64(self, value: f64) -> CheckResult {
        FiniteFloats::check(value)
    }
    fn serialize_char(self, _: char) -> CheckResult {
        Ok(())
    }
    fn serialize_str(self, _: &str) -> CheckResult {
        Ok(())
    }
    fn serialize_bytes(self, _: &[u8]) -> CheckResult {
        Ok(())
    }
    fn serialize_none(self) -> CheckResult {
        Ok(())
    }
    fn serialize_some<T>(self, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }
    fn serialize_unit(self) -> CheckResult {
        Ok(())
    }
    fn serialize_unit_struct(self, _: &'static str) -> CheckResult {
        Ok(())
    }
    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> CheckResult {
        Ok(())
    }
    fn serialize_newtype_struct<T>(self, _: &'static str, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }
    fn serialize_seq(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple(self, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_map(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T>(&mut self, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }
    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T>(&mut self, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }
    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }
    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }
    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T>(&mut self, key: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        key.serialize(*self)
    }
    fn serialize_value<T>(&mut self, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }
    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, _: &'static str, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }
    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, _: &'static str, value: &T) -> CheckResult
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }
    fn end(self) -> CheckResult {
        Ok(())
    }
}
