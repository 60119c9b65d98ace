//! Writable destination slots.
//!
//! A [`Slot`] is a typed location inside a destination record. The set of
//! destination kinds is closed (see [`Kind`]); every slot type maps onto one of
//! them and delegates conversion to [`crate::coerce`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::coerce::{self, invalid_type};
use crate::error::CoerceError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Text,
    Signed(u32),
    Unsigned(u32),
    Float(u32),
    Sequence,
    Map { text_keys: bool, nested: bool },
}

impl Kind {
    pub const fn is_map(self) -> bool {
        matches!(self, Self::Map { .. })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Text => write!(f, "text"),
            Self::Signed(bits) => write!(f, "i{bits}"),
            Self::Unsigned(bits) => write!(f, "u{bits}"),
            Self::Float(bits) => write!(f, "f{bits}"),
            Self::Sequence => write!(f, "sequence"),
            Self::Map { .. } => write!(f, "map"),
        }
    }
}

pub trait Slot: Send + Sync + 'static {
    fn kind(&self) -> Kind;

    fn is_settable(&self) -> bool {
        true
    }

    fn is_unset(&self) -> bool {
        false
    }

    /// Replaces the slot content; on error the slot is left untouched.
    fn assign(&mut self, value: &Value) -> Result<(), CoerceError>;

    /// Whether assigning `value` would leave the slot unchanged.
    fn holds(&self, value: &Value) -> bool;

    fn value(&self) -> Value;

    fn as_map_mut(&mut self) -> Option<&mut dyn MapSlot> {
        None
    }
}

/// Slot types with a statically known kind that can be freshly allocated.
pub trait Typed: Slot + Default {
    const KIND: Kind;
}

/// Access to a map-typed slot by path segment.
pub trait MapSlot: Send + Sync {
    fn text_keys(&self) -> bool;

    fn nested(&self) -> bool;

    fn entry_value(&self, key: &str) -> Option<Value>;

    fn entry_holds(&self, key: &str, value: &Value) -> bool;

    /// Nested map stored at `key`, inserting an empty one when absent.
    fn entry_map(&mut self, key: &str) -> Option<&mut dyn MapSlot>;

    /// A zero-valued element, detached from the map.
    fn fresh_entry(&self) -> Box<dyn Slot>;

    /// Coerces `value` into a fresh element and stores it at `key`.
    fn assign_entry(&mut self, key: &str, value: &Value) -> Result<(), CoerceError>;
}

pub trait MapKey: Clone + Eq + Hash + Ord + Send + Sync + 'static {
    const TEXT: bool;

    fn from_segment(segment: &str) -> Option<Self>;

    fn to_segment(&self) -> String;
}

impl MapKey for String {
    const TEXT: bool = true;

    fn from_segment(segment: &str) -> Option<Self> {
        Some(segment.to_owned())
    }

    fn to_segment(&self) -> String {
        self.clone()
    }
}

macro_rules! integer_key {
    ($($ty:ty),*) => {
        $(impl MapKey for $ty {
            const TEXT: bool = false;

            fn from_segment(segment: &str) -> Option<Self> {
                segment.parse().ok()
            }

            fn to_segment(&self) -> String {
                self.to_string()
            }
        })*
    };
}

integer_key!(i8, i16, i32, i64, u8, u16, u32, u64);

impl Typed for String {
    const KIND: Kind = Kind::Text;
}

impl Slot for String {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
        *self = coerce::to_text(value)?;
        Ok(())
    }

    fn holds(&self, value: &Value) -> bool {
        coerce::to_text(value).is_ok_and(|text| text == *self)
    }

    fn value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl Typed for bool {
    const KIND: Kind = Kind::Bool;
}

impl Slot for bool {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
        *self = coerce::to_bool(value)?;
        Ok(())
    }

    fn holds(&self, value: &Value) -> bool {
        coerce::to_bool(value).is_ok_and(|flag| flag == *self)
    }

    fn value(&self) -> Value {
        Value::Bool(*self)
    }
}

macro_rules! signed_slot {
    ($($ty:ty => $bits:expr),*) => {
        $(impl Typed for $ty {
            const KIND: Kind = Kind::Signed($bits);
        }

        impl Slot for $ty {
            fn kind(&self) -> Kind {
                Self::KIND
            }

            fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
                *self = coerce::to_signed(value, $bits)? as $ty;
                Ok(())
            }

            fn holds(&self, value: &Value) -> bool {
                coerce::to_signed(value, $bits).is_ok_and(|number| number == *self as i64)
            }

            fn value(&self) -> Value {
                Value::Int(*self as i64)
            }
        })*
    };
}

macro_rules! unsigned_slot {
    ($($ty:ty => $bits:expr),*) => {
        $(impl Typed for $ty {
            const KIND: Kind = Kind::Unsigned($bits);
        }

        impl Slot for $ty {
            fn kind(&self) -> Kind {
                Self::KIND
            }

            fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
                *self = coerce::to_unsigned(value, $bits)? as $ty;
                Ok(())
            }

            fn holds(&self, value: &Value) -> bool {
                coerce::to_unsigned(value, $bits).is_ok_and(|number| number == *self as u64)
            }

            fn value(&self) -> Value {
                Value::UInt(*self as u64)
            }
        })*
    };
}

signed_slot!(i8 => 8, i16 => 16, i32 => 32, i64 => 64, isize => isize::BITS);
unsigned_slot!(u8 => 8, u16 => 16, u32 => 32, u64 => 64, usize => usize::BITS);

impl Typed for f32 {
    const KIND: Kind = Kind::Float(32);
}

impl Slot for f32 {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
        *self = coerce::to_float(value, 32)? as f32;
        Ok(())
    }

    fn holds(&self, value: &Value) -> bool {
        coerce::to_float(value, 32).is_ok_and(|number| number as f32 == *self)
    }

    fn value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl Typed for f64 {
    const KIND: Kind = Kind::Float(64);
}

impl Slot for f64 {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
        *self = coerce::to_float(value, 64)?;
        Ok(())
    }

    fn holds(&self, value: &Value) -> bool {
        coerce::to_float(value, 64).is_ok_and(|number| number == *self)
    }

    fn value(&self) -> Value {
        Value::Float(*self)
    }
}

impl<T: Typed> Typed for Vec<T> {
    const KIND: Kind = Kind::Sequence;
}

impl<T: Typed> Slot for Vec<T> {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
        let Value::List(items) = value else {
            return Err(invalid_type(Self::KIND, value));
        };

        let mut next = Vec::with_capacity(items.len());
        for item in items {
            let mut element = T::default();
            coerce::assign(&mut element, item)?;
            next.push(element);
        }
        *self = next;
        Ok(())
    }

    fn holds(&self, value: &Value) -> bool {
        match value {
            Value::List(items) => {
                items.len() == self.len()
                    && self.iter().zip(items).all(|(element, item)| element.holds(item))
            }
            _ => false,
        }
    }

    fn value(&self) -> Value {
        Value::List(self.iter().map(Slot::value).collect())
    }
}

macro_rules! map_slot {
    ($map:ident) => {
        impl<K: MapKey, V: Typed> Typed for $map<K, V> {
            const KIND: Kind = Kind::Map {
                text_keys: K::TEXT,
                nested: V::KIND.is_map(),
            };
        }

        impl<K: MapKey, V: Typed> Slot for $map<K, V> {
            fn kind(&self) -> Kind {
                Self::KIND
            }

            fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
                Err(invalid_type(Self::KIND, value))
            }

            fn holds(&self, value: &Value) -> bool {
                let Value::Map(entries) = value else {
                    return false;
                };
                entries.len() == self.len()
                    && entries.iter().all(|(key, item)| self.entry_holds(key, item))
            }

            fn value(&self) -> Value {
                Value::Map(
                    self.iter()
                        .map(|(key, element)| (key.to_segment(), element.value()))
                        .collect(),
                )
            }

            fn as_map_mut(&mut self) -> Option<&mut dyn MapSlot> {
                Some(self)
            }
        }

        impl<K: MapKey, V: Typed> MapSlot for $map<K, V> {
            fn text_keys(&self) -> bool {
                K::TEXT
            }

            fn nested(&self) -> bool {
                V::KIND.is_map()
            }

            fn entry_value(&self, key: &str) -> Option<Value> {
                let key = K::from_segment(key)?;
                self.get(&key).map(Slot::value)
            }

            fn entry_holds(&self, key: &str, value: &Value) -> bool {
                K::from_segment(key)
                    .and_then(|key| self.get(&key))
                    .is_some_and(|element| element.holds(value))
            }

            fn entry_map(&mut self, key: &str) -> Option<&mut dyn MapSlot> {
                let key = K::from_segment(key)?;
                self.entry(key).or_default().as_map_mut()
            }

            fn fresh_entry(&self) -> Box<dyn Slot> {
                Box::new(V::default())
            }

            fn assign_entry(&mut self, key: &str, value: &Value) -> Result<(), CoerceError> {
                let index = K::from_segment(key).ok_or_else(|| CoerceError::InvalidValue {
                    expected: Self::KIND,
                    input: key.to_owned(),
                })?;
                let mut element = V::default();
                coerce::assign(&mut element, value)?;
                self.insert(index, element);
                Ok(())
            }
        }
    };
}

map_slot!(HashMap);
map_slot!(BTreeMap);

impl<T: Typed> Typed for Option<T> {
    const KIND: Kind = T::KIND;
}

impl<T: Typed> Slot for Option<T> {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn is_settable(&self) -> bool {
        self.as_ref().map_or(true, Slot::is_settable)
    }

    fn is_unset(&self) -> bool {
        self.is_none()
    }

    fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
        if matches!(value, Value::Null) {
            *self = None;
            return Ok(());
        }

        let mut inner = T::default();
        coerce::assign(&mut inner, value)?;
        *self = Some(inner);
        Ok(())
    }

    fn holds(&self, value: &Value) -> bool {
        match self {
            Some(inner) => inner.holds(value),
            None => matches!(value, Value::Null),
        }
    }

    fn value(&self) -> Value {
        self.as_ref().map_or(Value::Null, Slot::value)
    }

    fn as_map_mut(&mut self) -> Option<&mut dyn MapSlot> {
        self.get_or_insert_with(T::default).as_map_mut()
    }
}

impl<T: Typed> Typed for Box<T> {
    const KIND: Kind = T::KIND;
}

impl<T: Typed> Slot for Box<T> {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn is_settable(&self) -> bool {
        (**self).is_settable()
    }

    fn is_unset(&self) -> bool {
        (**self).is_unset()
    }

    fn assign(&mut self, value: &Value) -> Result<(), CoerceError> {
        (**self).assign(value)
    }

    fn holds(&self, value: &Value) -> bool {
        (**self).holds(value)
    }

    fn value(&self) -> Value {
        (**self).value()
    }

    fn as_map_mut(&mut self) -> Option<&mut dyn MapSlot> {
        (**self).as_map_mut()
    }
}

/// A field fixed at construction; providers cannot overwrite it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pinned<T>(T);

impl<T> Pinned<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn get(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Pinned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Typed> Typed for Pinned<T> {
    const KIND: Kind = T::KIND;
}

impl<T: Typed> Slot for Pinned<T> {
    fn kind(&self) -> Kind {
        Self::KIND
    }

    fn is_settable(&self) -> bool {
        false
    }

    fn assign(&mut self, _value: &Value) -> Result<(), CoerceError> {
        Err(CoerceError::NotSetable)
    }

    fn holds(&self, value: &Value) -> bool {
        self.0.holds(value)
    }

    fn value(&self) -> Value {
        self.0.value()
    }
}
