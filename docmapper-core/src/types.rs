//! Type coercion registry.
//!
//! Every key is declared with a [`TypeTag`]. At definition time the tag is resolved
//! through a [`CoercionRegistry`] into an `Arc<dyn Coercion>` that converts
//! application values into their stored form and back.
//!
//! Coercions are lenient by default: input that cannot be converted becomes `null`.
//! The strict entry point [`Coercion::cast`] reports the failure instead, which is what
//! keys declared `strict` use.
//!
//! New tags are added with [`CoercionRegistry::register`]; embedded model types are
//! registered this way by the [`ModelRegistry`](crate::model::ModelRegistry).

use bson::{
    Binary, Bson, DateTime as BsonDateTime, Document,
    oid::ObjectId,
    spec::BinarySubtype,
};
use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use std::{collections::HashMap, fmt, sync::Arc};
use uuid::Uuid;

use crate::{
    error::TypecastError,
    value::{Value, date_to_bson, time_from_bson},
};

/// Result of a strict coercion.
pub type CastResult = Result<Bson, TypecastError>;

/// Declared type of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// No coercion, natural value mapping.
    Any,
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Time,
    Array,
    Set,
    Hash,
    Binary,
    ObjectId,
    Uuid,
    /// An embeddable model type, by registered name.
    Embedded(String),
    /// A user registered coercion, by registered name.
    Custom(String),
}

impl TypeTag {
    /// Name under which the coercion is looked up in the registry.
    pub fn name(&self) -> &str {
        match self {
            TypeTag::Any => "Any",
            TypeTag::String => "String",
            TypeTag::Integer => "Integer",
            TypeTag::Float => "Float",
            TypeTag::Boolean => "Boolean",
            TypeTag::Date => "Date",
            TypeTag::Time => "Time",
            TypeTag::Array => "Array",
            TypeTag::Set => "Set",
            TypeTag::Hash => "Hash",
            TypeTag::Binary => "Binary",
            TypeTag::ObjectId => "ObjectId",
            TypeTag::Uuid => "Uuid",
            TypeTag::Embedded(name) | TypeTag::Custom(name) => name,
        }
    }

    /// Container tags accept an element typecast.
    pub fn is_container(&self) -> bool {
        matches!(self, TypeTag::Array | TypeTag::Set)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A pair of conversion functions for one type tag.
///
/// Both directions must accept `nil`/`null` without failing.
pub trait Coercion: Send + Sync {
    /// Converts an application value into its stored form, reporting failure.
    fn cast(&self, value: &Value) -> CastResult;

    /// Converts a stored value back into an application value.
    fn from_store(&self, bson: &Bson) -> Value;

    /// Lenient form of [`Coercion::cast`]: failures become `null`.
    fn to_store(&self, value: &Value) -> Bson {
        self.cast(value).unwrap_or(Bson::Null)
    }
}

/// Lookup table from tag name to coercion.
#[derive(Clone)]
pub struct CoercionRegistry {
    coercions: HashMap<String, Arc<dyn Coercion>>,
}

impl fmt::Debug for CoercionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.coercions.keys().collect::<Vec<_>>();
        names.sort();

        f.debug_struct("CoercionRegistry")
            .field("coercions", &names)
            .finish()
    }
}

impl Default for CoercionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CoercionRegistry {
    /// Creates a registry holding the built-in coercions.
    pub fn new() -> Self {
        let mut registry = Self { coercions: HashMap::new() };

        registry.register("Any", Arc::new(AnyCoercion));
        registry.register("String", Arc::new(StringCoercion));
        registry.register("Integer", Arc::new(IntegerCoercion));
        registry.register("Float", Arc::new(FloatCoercion));
        registry.register("Boolean", Arc::new(BooleanCoercion));
        registry.register("Date", Arc::new(DateCoercion));
        registry.register("Time", Arc::new(TimeCoercion));
        registry.register("Array", Arc::new(ArrayCoercion));
        registry.register("Set", Arc::new(SetCoercion));
        registry.register("Hash", Arc::new(HashCoercion));
        registry.register("Binary", Arc::new(BinaryCoercion));
        registry.register("ObjectId", Arc::new(ObjectIdCoercion));
        registry.register("Uuid", Arc::new(UuidCoercion));

        registry
    }

    /// Registers (or replaces) the coercion for a tag name.
    pub fn register(&mut self, name: impl Into<String>, coercion: Arc<dyn Coercion>) {
        self.coercions.insert(name.into(), coercion);
    }

    /// Returns the coercion registered for a tag, if any.
    pub fn resolve(&self, tag: &TypeTag) -> Option<Arc<dyn Coercion>> {
        self.coercions.get(tag.name()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.coercions.contains_key(name)
    }
}

/// Untyped keys: natural mapping.
pub struct AnyCoercion;

impl Coercion for AnyCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        Ok(value.to_bson())
    }

    fn from_store(&self, bson: &Bson) -> Value {
        Value::from_bson(bson)
    }
}

pub struct StringCoercion;

impl Coercion for StringCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        Ok(match value {
            Value::Nil => Bson::Null,
            Value::String(s) => Bson::String(s.clone()),
            Value::Boolean(b) => Bson::String(b.to_string()),
            Value::Integer(i) => Bson::String(i.to_string()),
            Value::Float(f) => Bson::String(f.to_string()),
            Value::Date(d) => Bson::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Bson::String(t.to_rfc3339()),
            Value::ObjectId(id) => Bson::String(id.to_hex()),
            Value::Uuid(uuid) => Bson::String(uuid.to_string()),
            other => return Err(TypecastError::new("String", other)),
        })
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::Null | Bson::Undefined => Value::Nil,
            Bson::String(s) | Bson::Symbol(s) => Value::String(s.clone()),
            other => match self.cast(&Value::from_bson(other)) {
                Ok(Bson::String(s)) => Value::String(s),
                _ => Value::Nil,
            },
        }
    }
}

pub struct IntegerCoercion;

impl IntegerCoercion {
    /// Parses the leading integer of a string the way lenient numeric parsing does:
    /// optional whitespace and sign, then digits (underscores allowed between digits).
    /// A zero result is accepted only for literal zero spellings.
    fn parse(input: &str) -> Option<i64> {
        let trimmed = input.trim_start();
        let (negative, rest) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let mut digits = String::new();
        for ch in rest.chars() {
            match ch {
                '0'..='9' => digits.push(ch),
                '_' if !digits.is_empty() => continue,
                _ => break,
            }
        }

        let parsed = digits.parse::<i64>().unwrap_or(0);
        let parsed = if negative { -parsed } else { parsed };

        if parsed != 0 {
            return Some(parsed);
        }

        is_zero_literal(rest).then_some(0)
    }
}

fn is_zero_literal(input: &str) -> bool {
    let body = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0b"))
        .unwrap_or(input);

    body.starts_with('0')
}

impl Coercion for IntegerCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        match value {
            Value::Nil => Ok(Bson::Null),
            Value::Integer(i) => Ok(Bson::Int64(*i)),
            Value::Float(f) if f.is_finite() => Ok(Bson::Int64(f.trunc() as i64)),
            Value::String(s) => Self::parse(s)
                .map(Bson::Int64)
                .ok_or_else(|| TypecastError::new("Integer", value)),
            other => Err(TypecastError::new("Integer", other)),
        }
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::Int32(i) => Value::Integer(i64::from(*i)),
            Bson::Int64(i) => Value::Integer(*i),
            Bson::Null | Bson::Undefined => Value::Nil,
            other => match self.to_store(&Value::from_bson(other)) {
                Bson::Int64(i) => Value::Integer(i),
                _ => Value::Nil,
            },
        }
    }
}

pub struct FloatCoercion;

impl Coercion for FloatCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        match value {
            Value::Nil => Ok(Bson::Null),
            Value::Float(f) => Ok(Bson::Double(*f)),
            Value::Integer(i) => Ok(Bson::Double(*i as f64)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Bson::Double)
                .ok_or_else(|| TypecastError::new("Float", value)),
            other => Err(TypecastError::new("Float", other)),
        }
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::Double(f) => Value::Float(*f),
            Bson::Null | Bson::Undefined => Value::Nil,
            other => match self.to_store(&Value::from_bson(other)) {
                Bson::Double(f) => Value::Float(f),
                _ => Value::Nil,
            },
        }
    }
}

pub struct BooleanCoercion;

impl BooleanCoercion {
    const TRUTHY: [&'static str; 6] = ["true", "TRUE", "True", "t", "T", "1"];
    const FALSY: [&'static str; 6] = ["false", "FALSE", "False", "f", "F", "0"];

    /// Looks a value up in the truth table. `None` means "not in the table".
    pub fn lookup(value: &Value) -> Option<bool> {
        match value {
            Value::Boolean(b) => Some(*b),
            Value::Integer(1) => Some(true),
            Value::Integer(0) => Some(false),
            Value::Float(f) if *f == 1.0 => Some(true),
            Value::Float(f) if *f == 0.0 => Some(false),
            Value::String(s) if Self::TRUTHY.contains(&s.as_str()) => Some(true),
            Value::String(s) if Self::FALSY.contains(&s.as_str()) => Some(false),
            _ => None,
        }
    }
}

impl Coercion for BooleanCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        if value.is_nil() {
            return Ok(Bson::Null);
        }

        Self::lookup(value)
            .map(Bson::Boolean)
            .ok_or_else(|| TypecastError::new("Boolean", value))
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::Boolean(b) => Value::Boolean(*b),
            Bson::Null | Bson::Undefined => Value::Nil,
            other => Self::lookup(&Value::from_bson(other)).map_or(Value::Nil, Value::Boolean),
        }
    }
}

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d %Y",
];

const NAIVE_TIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const ZONED_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Flexible date parsing. Accepts date forms and anything [`parse_time`] accepts.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
        .or_else(|| parse_time(input).map(|time| time.date_naive()))
}

/// Flexible time parsing, normalized to UTC. Input without a zone is read as UTC.
pub fn parse_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if input.is_empty() {
        return None;
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(input) {
        return Some(time.with_timezone(&Utc));
    }

    if let Ok(time) = DateTime::parse_from_rfc2822(input) {
        return Some(time.with_timezone(&Utc));
    }

    for format in ZONED_TIME_FORMATS {
        if let Ok(time) = DateTime::<FixedOffset>::parse_from_str(input, format) {
            return Some(time.with_timezone(&Utc));
        }
    }

    for format in NAIVE_TIME_FORMATS {
        if let Ok(time) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&time));
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| Utc.from_utc_datetime(&time))
}

/// Truncates a time to millisecond granularity.
pub fn truncate_millis(time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(time.timestamp_millis())
}

pub struct DateCoercion;

impl Coercion for DateCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        let date = match value {
            Value::Nil => return Ok(Bson::Null),
            Value::Date(d) => Some(*d),
            Value::Time(t) => Some(t.date_naive()),
            Value::String(s) => parse_date(s),
            _ => None,
        };

        date.map(|d| Bson::DateTime(date_to_bson(d)))
            .ok_or_else(|| TypecastError::new("Date", value))
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::DateTime(dt) => time_from_bson(dt)
                .map_or(Value::Nil, |time| Value::Date(time.date_naive())),
            Bson::String(s) => parse_date(s).map_or(Value::Nil, Value::Date),
            _ => Value::Nil,
        }
    }
}

pub struct TimeCoercion;

impl Coercion for TimeCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        let time = match value {
            Value::Nil => return Ok(Bson::Null),
            Value::Time(t) => Some(*t),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive)),
            Value::Integer(secs) => DateTime::<Utc>::from_timestamp(*secs, 0),
            Value::String(s) => parse_time(s),
            _ => None,
        };

        time.and_then(truncate_millis)
            .map(|t| Bson::DateTime(BsonDateTime::from_millis(t.timestamp_millis())))
            .ok_or_else(|| TypecastError::new("Time", value))
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::DateTime(dt) => time_from_bson(dt).map_or(Value::Nil, Value::Time),
            Bson::String(s) => parse_time(s)
                .and_then(truncate_millis)
                .map_or(Value::Nil, Value::Time),
            _ => Value::Nil,
        }
    }
}

/// Wraps scalars into a singleton list; nil becomes an empty list.
fn elements_of(value: &Value) -> Vec<Value> {
    match value {
        Value::Nil => Vec::new(),
        Value::Array(items) | Value::Set(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(items.len());

    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }

    unique
}

pub struct ArrayCoercion;

impl Coercion for ArrayCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        Ok(Bson::Array(
            elements_of(value)
                .iter()
                .map(Value::to_bson)
                .collect(),
        ))
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::Array(items) => Value::Array(items.iter().map(Value::from_bson).collect()),
            Bson::Null | Bson::Undefined => Value::Array(Vec::new()),
            other => Value::Array(vec![Value::from_bson(other)]),
        }
    }
}

pub struct SetCoercion;

impl Coercion for SetCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        Ok(Bson::Array(
            dedup(elements_of(value))
                .iter()
                .map(Value::to_bson)
                .collect(),
        ))
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::Array(items) => Value::Set(dedup(items.iter().map(Value::from_bson).collect())),
            Bson::Null | Bson::Undefined => Value::Set(Vec::new()),
            other => Value::Set(vec![Value::from_bson(other)]),
        }
    }
}

pub struct HashCoercion;

impl Coercion for HashCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        Ok(match value {
            Value::Hash(_) | Value::Model(_) => value.to_bson(),
            _ => Bson::Document(Document::new()),
        })
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match Value::from_bson(bson) {
            hash @ Value::Hash(_) => hash,
            _ => Value::Hash(Default::default()),
        }
    }
}

pub struct BinaryCoercion;

impl Coercion for BinaryCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        match value {
            Value::Nil => Ok(Bson::Null),
            Value::Binary(bytes) => Ok(generic_binary(bytes.clone())),
            Value::String(s) => Ok(generic_binary(s.as_bytes().to_vec())),
            other => Err(TypecastError::new("Binary", other)),
        }
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::Binary(binary) => Value::Binary(binary.bytes.clone()),
            Bson::String(s) => Value::Binary(s.as_bytes().to_vec()),
            _ => Value::Nil,
        }
    }
}

fn generic_binary(bytes: Vec<u8>) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Generic,
        bytes,
    })
}

pub struct ObjectIdCoercion;

impl Coercion for ObjectIdCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        match value {
            Value::Nil => Ok(Bson::Null),
            Value::ObjectId(id) => Ok(Bson::ObjectId(*id)),
            Value::String(s) if s.trim().is_empty() => Ok(Bson::Null),
            // Ids that are not legal object ids are kept verbatim (legacy string ids).
            Value::String(s) => Ok(ObjectId::parse_str(s)
                .map(Bson::ObjectId)
                .unwrap_or_else(|_| Bson::String(s.clone()))),
            Value::Model(model) => Ok(model.id().map_or(Bson::Null, Bson::ObjectId)),
            other => Err(TypecastError::new("ObjectId", other)),
        }
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match bson {
            Bson::ObjectId(id) => Value::ObjectId(*id),
            Bson::String(s) => ObjectId::parse_str(s)
                .map_or_else(|_| Value::String(s.clone()), Value::ObjectId),
            _ => Value::Nil,
        }
    }
}

pub struct UuidCoercion;

impl Coercion for UuidCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        match value {
            Value::Nil => Ok(Bson::Null),
            Value::Uuid(_) => Ok(value.to_bson()),
            Value::String(s) => Uuid::parse_str(s.trim())
                .map(|uuid| Value::Uuid(uuid).to_bson())
                .map_err(|_| TypecastError::new("Uuid", value)),
            other => Err(TypecastError::new("Uuid", other)),
        }
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match Value::from_bson(bson) {
            uuid @ Value::Uuid(_) => uuid,
            Value::String(s) => Uuid::parse_str(&s).map_or(Value::Nil, Value::Uuid),
            _ => Value::Nil,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    fn registry() -> CoercionRegistry {
        CoercionRegistry::new()
    }

    fn builtin_tags() -> Vec<TypeTag> {
        vec![
            TypeTag::Any,
            TypeTag::String,
            TypeTag::Integer,
            TypeTag::Float,
            TypeTag::Boolean,
            TypeTag::Date,
            TypeTag::Time,
            TypeTag::Array,
            TypeTag::Set,
            TypeTag::Hash,
            TypeTag::Binary,
            TypeTag::ObjectId,
            TypeTag::Uuid,
        ]
    }

    #[test]
    fn nil_is_total_for_every_builtin() {
        let registry = registry();

        for tag in builtin_tags() {
            let coercion = registry.resolve(&tag).unwrap();
            let stored = coercion.cast(&Value::Nil).unwrap();
            let back = coercion.from_store(&stored);

            match tag {
                TypeTag::Array => assert_eq!(back, Value::Array(vec![])),
                TypeTag::Set => assert_eq!(back, Value::Set(vec![])),
                TypeTag::Hash => assert_eq!(back, Value::Hash(Default::default())),
                _ => assert_eq!(back, Value::Nil, "{tag}"),
            }
        }
    }

    #[test]
    fn boolean_truth_table() {
        let coercion = BooleanCoercion;

        for truthy in [
            Value::from(true),
            Value::from("true"),
            Value::from("TRUE"),
            Value::from("True"),
            Value::from("t"),
            Value::from("T"),
            Value::from("1"),
            Value::from(1),
            Value::from(1.0),
        ] {
            assert_eq!(coercion.to_store(&truthy), Bson::Boolean(true), "{truthy:?}");
        }

        for falsy in [
            Value::from(false),
            Value::from("false"),
            Value::from("FALSE"),
            Value::from("False"),
            Value::from("f"),
            Value::from("F"),
            Value::from("0"),
            Value::from(0),
            Value::from(0.0),
        ] {
            assert_eq!(coercion.to_store(&falsy), Bson::Boolean(false), "{falsy:?}");
        }

        for other in [Value::from("maybe"), Value::from(2), Value::from(0.5), Value::Nil] {
            assert_eq!(coercion.to_store(&other), Bson::Null, "{other:?}");
        }
    }

    #[test]
    fn integer_accepts_numeric_strings_only() {
        let coercion = IntegerCoercion;

        assert_eq!(coercion.to_store(&Value::from("12")), Bson::Int64(12));
        assert_eq!(coercion.to_store(&Value::from(" -7")), Bson::Int64(-7));
        assert_eq!(coercion.to_store(&Value::from("12abc")), Bson::Int64(12));
        assert_eq!(coercion.to_store(&Value::from("0")), Bson::Int64(0));
        assert_eq!(coercion.to_store(&Value::from("000")), Bson::Int64(0));
        assert_eq!(coercion.to_store(&Value::from("0x0")), Bson::Int64(0));
        assert_eq!(coercion.to_store(&Value::from("abc")), Bson::Null);
        assert_eq!(coercion.to_store(&Value::from("0x1A")), Bson::Null);
        assert_eq!(coercion.to_store(&Value::from(3.9)), Bson::Int64(3));
        assert!(coercion.cast(&Value::from("abc")).is_err());
    }

    #[test]
    fn float_rejects_non_numeric_strings() {
        let coercion = FloatCoercion;

        assert_eq!(coercion.to_store(&Value::from("2.5")), Bson::Double(2.5));
        assert_eq!(coercion.to_store(&Value::from(2)), Bson::Double(2.0));
        assert_eq!(coercion.to_store(&Value::from("two")), Bson::Null);
    }

    #[test]
    fn time_parses_text_and_truncates_to_millis() {
        let coercion = TimeCoercion;

        let stored = coercion.to_store(&Value::from("2024-03-01T10:20:30.123456+02:00"));
        let Value::Time(time) = coercion.from_store(&stored) else {
            panic!("expected a time");
        };

        assert_eq!(time.hour(), 8);
        assert_eq!(time.nanosecond(), 123_000_000);
        assert_eq!(coercion.to_store(&Value::from("not a time")), Bson::Null);
        assert_eq!(
            coercion.from_store(&coercion.to_store(&Value::from("2024-03-01 10:20:30"))),
            coercion.from_store(&coercion.to_store(&Value::from("2024-03-01T10:20:30Z"))),
        );
    }

    #[test]
    fn date_accepts_several_formats() {
        let coercion = DateCoercion;
        let expected = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        for input in ["2024-03-01", "2024/03/01", "03/01/2024", "2024-03-01T23:59:59Z"] {
            let stored = coercion.to_store(&Value::from(input));
            assert_eq!(coercion.from_store(&stored), expected, "{input}");
        }

        assert_eq!(coercion.to_store(&Value::from("32/13/2024")), Bson::Null);
    }

    #[test]
    fn containers_wrap_scalars() {
        assert_eq!(
            ArrayCoercion.to_store(&Value::from("a")),
            Bson::Array(vec![Bson::String("a".into())])
        );
        assert_eq!(
            SetCoercion.from_store(&Bson::Array(vec![Bson::Int64(1), Bson::Int64(1), Bson::Int64(2)])),
            Value::Set(vec![Value::Integer(1), Value::Integer(2)])
        );
        assert_eq!(
            HashCoercion.to_store(&Value::from(5)),
            Bson::Document(Document::new())
        );
    }

    #[test]
    fn object_id_parses_legal_hex_and_keeps_legacy_strings() {
        let id = ObjectId::new();

        assert_eq!(
            ObjectIdCoercion.to_store(&Value::from(id.to_hex())),
            Bson::ObjectId(id)
        );
        assert_eq!(
            ObjectIdCoercion.to_store(&Value::from("legacy-1")),
            Bson::String("legacy-1".into())
        );
        assert_eq!(ObjectIdCoercion.to_store(&Value::from("")), Bson::Null);
    }

    #[test]
    fn double_application_is_idempotent() {
        let registry = registry();
        let inputs = [
            (TypeTag::Integer, Value::from("42")),
            (TypeTag::Float, Value::from("4.25")),
            (TypeTag::Boolean, Value::from("t")),
            (TypeTag::String, Value::from(17)),
            (TypeTag::Time, Value::from("2024-01-02 03:04:05.678901")),
            (TypeTag::Date, Value::from("2024-01-02")),
            (TypeTag::Set, Value::from(vec![1, 1, 2])),
        ];

        for (tag, input) in inputs {
            let coercion = registry.resolve(&tag).unwrap();
            let once = coercion.to_store(&input);
            let twice = coercion.to_store(&coercion.from_store(&once));

            assert_eq!(once, twice, "{tag}");
        }
    }

    #[test]
    fn custom_tags_can_be_registered() {
        struct Upcase;

        impl Coercion for Upcase {
            fn cast(&self, value: &Value) -> CastResult {
                Ok(value
                    .as_str()
                    .map_or(Bson::Null, |s| Bson::String(s.to_uppercase())))
            }

            fn from_store(&self, bson: &Bson) -> Value {
                Value::from_bson(bson)
            }
        }

        let mut registry = registry();
        registry.register("Upcase", Arc::new(Upcase));

        let coercion = registry.resolve(&TypeTag::Custom("Upcase".into())).unwrap();
        assert_eq!(coercion.to_store(&Value::from("abc")), Bson::String("ABC".into()));
        assert!(registry.resolve(&TypeTag::Custom("Missing".into())).is_none());
    }
}
