//! Application-facing values.
//!
//! A [`Value`] is what callers read from and write to model attributes. The stored
//! form is always [`Bson`]; typed keys convert between the two through their
//! [`Coercion`](crate::types::Coercion). Untyped keys and dynamic keys use the
//! natural mapping implemented here ([`Value::to_bson`] / [`Value::from_bson`]).

use bson::{
    Binary, Bson, DateTime as BsonDateTime, Document,
    oid::ObjectId,
    spec::BinarySubtype,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::model::Model;

/// A dynamically typed attribute value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Calendar date without a time component.
    Date(NaiveDate),
    /// Instant in UTC with millisecond precision once stored.
    Time(DateTime<Utc>),
    Array(Vec<Value>),
    /// Ordered collection without duplicates.
    Set(Vec<Value>),
    Hash(BTreeMap<String, Value>),
    Binary(Vec<u8>),
    ObjectId(ObjectId),
    Uuid(Uuid),
    /// An embedded model instance.
    Model(Box<Model>),
}

impl Value {
    /// Returns `true` for [`Value::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns `true` for nil, empty strings and empty containers.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) | Value::Set(items) => items.is_empty(),
            Value::Hash(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the elements of an array or set.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Hash(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Value::Model(model) => Some(model),
            _ => None,
        }
    }

    pub fn into_model(self) -> Option<Model> {
        match self {
            Value::Model(model) => Some(*model),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::Binary(_) => "binary",
            Value::ObjectId(_) => "object_id",
            Value::Uuid(_) => "uuid",
            Value::Model(_) => "model",
        }
    }

    /// Builds a hash value from `(key, value)` pairs.
    pub fn hash<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Hash(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Natural conversion to the stored form, used by untyped keys.
    pub fn to_bson(&self) -> Bson {
        match self {
            Value::Nil => Bson::Null,
            Value::Boolean(b) => Bson::Boolean(*b),
            Value::Integer(i) => Bson::Int64(*i),
            Value::Float(f) => Bson::Double(*f),
            Value::String(s) => Bson::String(s.clone()),
            Value::Date(d) => Bson::DateTime(date_to_bson(*d)),
            Value::Time(t) => Bson::DateTime(BsonDateTime::from_millis(t.timestamp_millis())),
            Value::Array(items) | Value::Set(items) => {
                Bson::Array(items.iter().map(Value::to_bson).collect())
            }
            Value::Hash(map) => Bson::Document(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_bson()))
                    .collect::<Document>(),
            ),
            Value::Binary(bytes) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: bytes.clone(),
            }),
            Value::ObjectId(id) => Bson::ObjectId(*id),
            Value::Uuid(uuid) => Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid,
                bytes: uuid.as_bytes().to_vec(),
            }),
            Value::Model(model) => Bson::Document(model.to_document()),
        }
    }

    /// Natural conversion from the stored form, used by untyped keys.
    pub fn from_bson(bson: &Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Value::Nil,
            Bson::Boolean(b) => Value::Boolean(*b),
            Bson::Int32(i) => Value::Integer(i64::from(*i)),
            Bson::Int64(i) => Value::Integer(*i),
            Bson::Double(f) => Value::Float(*f),
            Bson::String(s) | Bson::Symbol(s) => Value::String(s.clone()),
            Bson::DateTime(dt) => time_from_bson(dt).map_or(Value::Nil, Value::Time),
            Bson::Array(items) => Value::Array(items.iter().map(Value::from_bson).collect()),
            Bson::Document(doc) => Value::Hash(
                doc.iter()
                    .map(|(k, v)| (k.clone(), Value::from_bson(v)))
                    .collect(),
            ),
            Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => {
                Uuid::from_slice(&binary.bytes)
                    .map_or_else(|_| Value::Binary(binary.bytes.clone()), Value::Uuid)
            }
            Bson::Binary(binary) => Value::Binary(binary.bytes.clone()),
            Bson::ObjectId(id) => Value::ObjectId(*id),
            other => Value::String(other.to_string()),
        }
    }
}

pub(crate) fn date_to_bson(date: NaiveDate) -> BsonDateTime {
    let millis = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default();

    BsonDateTime::from_millis(millis)
}

pub(crate) fn time_from_bson(dt: &BsonDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Boolean,
    i32 => Integer,
    i64 => Integer,
    u32 => Integer,
    f32 => Float,
    f64 => Float,
    String => String,
    &str => String,
    NaiveDate => Date,
    DateTime<Utc> => Time,
    ObjectId => ObjectId,
    Uuid => Uuid,
    BTreeMap<String, Value> => Hash,
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl From<Model> for Value {
    fn from(model: Model) -> Self {
        Value::Model(Box::new(model))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

impl From<&Bson> for Value {
    fn from(bson: &Bson) -> Self {
        Value::from_bson(bson)
    }
}
