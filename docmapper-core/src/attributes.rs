//! Per-instance attribute storage with dirty tracking.
//!
//! The container stores values in their stored form, keyed by physical field name. Reads
//! and writes are routed through the model's [`KeySet`]; the baseline snapshot taken at
//! the last load or save defines what counts as changed.

use bson::{Bson, Document};
use std::sync::Arc;

use crate::{
    error::{MapperError, MapperResult},
    key::{ID_FIELD, Key, KeySet},
    value::Value,
};

/// Stored attributes of one model instance.
#[derive(Debug, Clone)]
pub struct AttributeContainer {
    model: String,
    keys: Arc<KeySet>,
    raw: Document,
    baseline: Document,
}

impl AttributeContainer {
    /// Creates an empty container for the named model type.
    pub fn new(model: impl Into<String>, keys: Arc<KeySet>) -> Self {
        Self {
            model: model.into(),
            keys,
            raw: Document::new(),
            baseline: Document::new(),
        }
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    fn lookup(&self, name: &str) -> MapperResult<Option<&Arc<Key>>> {
        match self.keys.get(name) {
            Some(key) => Ok(Some(key)),
            None if self.keys.is_static() => Err(MapperError::UndeclaredKey {
                model: self.model.clone(),
                key: name.to_string(),
            }),
            None => Ok(None),
        }
    }

    /// Reads an attribute by accessor name.
    pub fn read(&self, name: &str) -> MapperResult<Value> {
        let Some(key) = self.lookup(name)? else {
            return Ok(self.raw.get(name).map_or(Value::Nil, Value::from_bson));
        };

        match self.raw.get(key.field()) {
            Some(raw) => Ok(key.get(Some(raw))),
            None => match key.default_value() {
                Some(default) => Ok(key.get(Some(&key.set(&default)?))),
                None => Ok(key.get(None)),
            },
        }
    }

    /// Writes an attribute by accessor name, coercing through its key.
    pub fn write(&mut self, name: &str, value: &Value) -> MapperResult<()> {
        let (field, stored) = match self.lookup(name)? {
            Some(key) => (key.field().to_string(), key.set(value)?),
            None => (name.to_string(), value.to_bson()),
        };

        self.raw.insert(field, stored);

        Ok(())
    }

    /// Replaces the stored attributes with a document fetched from the store.
    ///
    /// Values are taken as already canonical. Undeclared fields of static-key models
    /// are dropped.
    pub fn load_from_source(&mut self, document: Document) {
        self.raw = document
            .into_iter()
            .filter(|(field, _)| self.keys.keeps_field(field))
            .collect();
        self.baseline = self.raw.clone();
    }

    /// Fills absent keys that declare a default, without marking them changed.
    ///
    /// A default the key rejects is stored as `null`.
    pub fn apply_defaults(&mut self) {
        for key in self.keys.iter() {
            if self.raw.contains_key(key.field()) {
                continue;
            }

            if let Some(default) = key.default_value() {
                let stored = key.set(&default).unwrap_or(Bson::Null);
                self.baseline.insert(key.field(), stored.clone());
                self.raw.insert(key.field(), stored);
            }
        }
    }

    /// Memoizes a generated identity so repeated reads agree.
    pub fn ensure_id(&mut self) -> Bson {
        match self.raw.get(ID_FIELD) {
            Some(id) if *id != Bson::Null => id.clone(),
            _ => {
                let id = match self.keys.get(ID_FIELD) {
                    Some(key) => key.get(None).to_bson(),
                    None => Bson::ObjectId(bson::oid::ObjectId::new()),
                };
                self.baseline.insert(ID_FIELD, id.clone());
                self.raw.insert(ID_FIELD, id.clone());
                id
            }
        }
    }

    /// Accessor names whose stored form differs from the baseline.
    pub fn changed_fields(&self) -> Vec<String> {
        self.changed_physical()
            .into_iter()
            .map(|field| self.accessor_name(&field))
            .collect()
    }

    /// `(old, new)` values of every changed attribute.
    pub fn changes(&self) -> Vec<(String, Value, Value)> {
        self.changed_physical()
            .into_iter()
            .map(|field| {
                let convert = |raw: Option<&Bson>| match self.keys.by_field(&field) {
                    Some(key) if raw.is_some() => key.get(raw),
                    _ => raw.map_or(Value::Nil, Value::from_bson),
                };

                (
                    self.accessor_name(&field),
                    convert(self.baseline.get(&field)),
                    convert(self.raw.get(&field)),
                )
            })
            .collect()
    }

    pub fn is_changed(&self, name: &str) -> bool {
        let field = self.keys.physical_name(name);
        match (self.raw.get(field), self.baseline.get(field)) {
            (Some(current), Some(baseline)) => !same_stored(current, baseline),
            (current, baseline) => current.is_some() || baseline.is_some(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_physical().is_empty()
    }

    fn changed_physical(&self) -> Vec<String> {
        let mut fields = self
            .raw
            .iter()
            .filter(|(field, value)| {
                self.baseline
                    .get(field.as_str())
                    .is_none_or(|baseline| !same_stored(baseline, value))
            })
            .map(|(field, _)| field.clone())
            .collect::<Vec<_>>();

        fields.extend(
            self.baseline
                .keys()
                .filter(|field| !self.raw.contains_key(field.as_str()))
                .cloned(),
        );

        fields
    }

    fn accessor_name(&self, field: &str) -> String {
        self.keys
            .by_field(field)
            .map_or_else(|| field.to_string(), |key| key.name().to_string())
    }

    /// `$set` and `$unset` operators for the changed fields. Empty when nothing changed.
    pub fn update_document(&self) -> Document {
        let mut set = Document::new();
        let mut unset = Document::new();

        for field in self.changed_physical() {
            if field == ID_FIELD {
                continue;
            }

            match self.raw.get(&field) {
                Some(value) => {
                    set.insert(field, value.clone());
                }
                None => {
                    unset.insert(field, "");
                }
            }
        }

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }

        update
    }

    /// Identity as of the last load or save.
    pub(crate) fn persisted_id(&self) -> Option<&Bson> {
        self.baseline.get(ID_FIELD)
    }

    /// The stored form, ready to be written.
    pub fn raw_document(&self) -> &Document {
        &self.raw
    }

    /// Takes the current state as the new baseline.
    pub fn mark_persisted(&mut self) {
        self.baseline = self.raw.clone();
    }

    pub(crate) fn field(&self, field: &str) -> Option<&Bson> {
        self.raw.get(field)
    }

    /// Writes a physical field directly, bypassing key coercion.
    pub(crate) fn write_field(&mut self, field: impl Into<String>, value: Bson) {
        self.raw.insert(field.into(), value);
    }

    pub(crate) fn remove_field(&mut self, field: &str) -> Option<Bson> {
        self.raw.remove(field)
    }
}

/// Stored-form equality where numbers compare by value, so an `Int32` loaded from the
/// store equals the `Int64` a key writes for the same number.
fn same_stored(left: &Bson, right: &Bson) -> bool {
    match (left, right) {
        (Bson::Array(left), Bson::Array(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(l, r)| same_stored(l, r))
        }
        (Bson::Document(left), Bson::Document(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(field, l)| right.get(field).is_some_and(|r| same_stored(l, r)))
        }
        _ => match (as_number(left), as_number(right)) {
            (Some(Number::Int(l)), Some(Number::Int(r))) => l == r,
            (Some(l), Some(r)) => l.as_f64() == r.as_f64(),
            _ => left == right,
        },
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

fn as_number(bson: &Bson) -> Option<Number> {
    match bson {
        Bson::Int32(i) => Some(Number::Int(i64::from(*i))),
        Bson::Int64(i) => Some(Number::Int(*i)),
        Bson::Double(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

impl PartialEq for AttributeContainer {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.raw == other.raw
    }
}
