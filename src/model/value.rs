use alloc::{collections::BTreeMap, string::String, vec::Vec};

/// Decoded field value.
///
/// Codecs translate between this tagged value and raw bytes; records expose
/// their fields as `Value`s through [`Record::get`](crate::model::Record::get)
/// and [`Record::set`](crate::model::Record::set).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// Unset / not available (e.g. an erased `0xFF` temperature).
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Serialized form of a record or composite: field name to value.
pub type ValueMap = BTreeMap<String, Value>;

/// Generates checked integer accessors (`as_u8`, `as_u16`, ...).
macro_rules! impl_int_accessors {
    ($($type:ty),*) => {
        $(
            paste::paste! {
                #[doc = "Returns the value as `" $type "` if it is an in-range integer."]
                #[inline]
                pub fn [<as_ $type>](&self) -> Option<$type> {
                    self.as_int().and_then(|v| <$type>::try_from(v).ok())
                }
            }
        )*
    };
}

/// Generates `From<$type> for Value` for integer primitives.
macro_rules! impl_from_int {
    ($($type:ty),*) => {
        $(
            impl From<$type> for Value {
                fn from(value: $type) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    impl_int_accessors!(u8, u16, u32, u64, i32);

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a float, accepting integers as well.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

impl_from_int!(u8, u16, u32, i8, i16, i32, i64);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<ValueMap> for Value {
    fn from(value: ValueMap) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
