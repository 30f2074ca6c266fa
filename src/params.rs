//! Bound parameter values and their wire encoding.
//!
//! Parameters are either positional (`?` placeholders) or named (`:name`,
//! `@name`, `$name` placeholders). Both shapes are forwarded to the worker
//! verbatim; the worker resolves them against the prepared statement.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// A single bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    /// Integer wider than 64 bits on the caller side; must still fit in an `i64`.
    BigInt(i128),
    Bool(bool),
    Blob(Vec<u8>),
    /// Sent as ISO-8601 text with millisecond precision.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Check that the value can be transmitted.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Real(v) if !v.is_finite() => Err(Error::Validation(format!(
                "non-finite number {v} cannot be bound"
            ))),
            Self::BigInt(v) if i64::try_from(*v).is_err() => Err(Error::Validation(format!(
                "integer {v} is outside the 64-bit range"
            ))),
            _ => Ok(()),
        }
    }

    /// Encode for the wire. Call [`Value::validate`] first.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Text(s) => Json::String(s.clone()),
            Self::Integer(i) => Json::from(*i),
            Self::Real(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::BigInt(i) => i64::try_from(*i).map(Json::from).unwrap_or(Json::Null),
            Self::Bool(b) => Json::Bool(*b),
            Self::Blob(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Self::Timestamp(ts) => {
                Json::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }

    /// Convert an arbitrary JSON value into a bindable value.
    ///
    /// Arrays of bytes become blobs; objects and other arrays are rejected.
    pub fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Null => Ok(Self::Null),
            Json::Bool(b) => Ok(Self::Bool(*b)),
            Json::String(s) => Ok(Self::Text(s.clone())),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Self::BigInt(i128::from(u)))
                } else {
                    Ok(Self::Real(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Json::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| {
                            Error::Validation(
                                "array parameters must be byte arrays (0-255)".to_string(),
                            )
                        })
                })
                .collect::<Result<Vec<u8>>>()
                .map(Self::Blob),
            Json::Object(_) => Err(Error::Validation(
                "objects cannot be bound as parameters".to_string(),
            )),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Parameters bound to one statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(BTreeMap<String, Value>),
}

impl Params {
    /// Check every value, and that named keys are non-empty.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Positional(values) => values.iter().try_for_each(Value::validate),
            Self::Named(map) => map.iter().try_for_each(|(key, value)| {
                if key.trim_start_matches([':', '@', '$']).is_empty() {
                    return Err(Error::Validation(format!(
                        "invalid parameter name {key:?}"
                    )));
                }
                value.validate()
            }),
        }
    }

    /// Whether no parameters are bound.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(map) => map.is_empty(),
        }
    }

    /// Encode for the wire: an array, an object, or nothing.
    pub fn to_json(&self) -> Option<Json> {
        match self {
            Self::None => None,
            Self::Positional(values) => Some(Json::Array(
                values.iter().map(Value::to_json).collect(),
            )),
            Self::Named(map) => Some(Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            )),
        }
    }

    /// Convert a JSON array or object into parameters.
    pub fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Null => Ok(Self::None),
            Json::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Self::Positional),
            Json::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Self::Named),
            _ => Err(Error::Validation(
                "parameters must be a JSON array or object".to_string(),
            )),
        }
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<BTreeMap<String, Value>> for Params {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Named(map)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Params {
    fn from(pairs: [(K, V); N]) -> Self {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Build positional [`Params`] from a list of values.
///
/// ```ignore
/// db.mutate("INSERT INTO t (a, b) VALUES (?, ?)", params![1, "two"]).await?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::Positional(Vec::new())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($value)),+])
    };
}
