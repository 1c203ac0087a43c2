//! Filter and update evaluation for in-memory documents.
//!
//! Filters and updates use the same `$`-prefixed operator documents the mapper sends
//! to every backend, so the in-memory store behaves like a document database for the
//! operators the mapper emits.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docmapper_core::error::{StoreError, StoreResult};

/// Type-erased, comparable representation of BSON values.
///
/// Integers and floats are normalized to `f64`. Values of different kinds are never
/// equal; for sorting they are ordered by kind first.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Number(f64),
    String(&'a str),
    Map(HashMap<&'a str, Comparable<'a>>),
    Array(Vec<Comparable<'a>>),
    Binary(&'a [u8]),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Binary(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
        }
    }

    /// Total order used for sorting: kind first, then value.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    /// Only values of the same kind are ordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Reads a possibly dotted field path.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;

    for part in parts {
        current = match current {
            Bson::Document(doc) => doc.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn unsupported(op: &str) -> StoreError {
    StoreError::InvalidDocument(format!("unsupported operator {op}"))
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Whether the document matches every entry of the filter.
    pub fn matches(&self, filter: &Document) -> StoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all(Self::clauses(key, condition)?)?,
                "$or" => self.any(Self::clauses(key, condition)?)?,
                "$nor" => !self.any(Self::clauses(key, condition)?)?,
                op if op.starts_with('$') => return Err(unsupported(op)),
                field => self.field_matches(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter_documents<'d>(
        documents: impl IntoIterator<Item = &'d Document>,
        filter: &Document,
    ) -> StoreResult<Vec<&'d Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).matches(filter)? {
                matched.push(document);
            }
        }

        Ok(matched)
    }

    fn clauses<'f>(op: &str, condition: &'f Bson) -> StoreResult<Vec<&'f Document>> {
        match condition {
            Bson::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_document().ok_or_else(|| {
                        StoreError::InvalidDocument(format!("{op} expects documents"))
                    })
                })
                .collect(),
            _ => Err(StoreError::InvalidDocument(format!("{op} expects an array"))),
        }
    }

    fn all(&self, clauses: Vec<&Document>) -> StoreResult<bool> {
        for clause in clauses {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any(&self, clauses: Vec<&Document>) -> StoreResult<bool> {
        for clause in clauses {
            if self.matches(clause)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn field_matches(&self, field: &str, condition: &Bson) -> StoreResult<bool> {
        let value = lookup(self.document, field);

        match condition {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                for (op, operand) in ops {
                    if !Self::operator_matches(value, op, operand)? {
                        return Ok(false);
                    }
                }

                Ok(true)
            }
            expected => Ok(Self::equals(value, expected)),
        }
    }

    /// Equality, matching array elements and treating a missing field as null.
    fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
        let expected = Comparable::from(expected);

        match value {
            None => expected == Comparable::Null,
            Some(value) => {
                let value = Comparable::from(value);
                if value == expected {
                    return true;
                }

                match value {
                    Comparable::Array(items) => items.iter().any(|item| *item == expected),
                    _ => false,
                }
            }
        }
    }

    fn compares(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
        let Some(value) = value else {
            return false;
        };
        let operand = Comparable::from(operand);

        let test = |candidate: &Comparable<'_>| {
            candidate
                .partial_cmp(&operand)
                .is_some_and(accept)
        };

        match Comparable::from(value) {
            Comparable::Array(items) => items.iter().any(test),
            scalar => test(&scalar),
        }
    }

    fn operator_matches(value: Option<&Bson>, op: &str, operand: &Bson) -> StoreResult<bool> {
        let list = || match operand {
            Bson::Array(items) => Ok(items),
            _ => Err(StoreError::InvalidDocument(format!("{op} expects an array"))),
        };

        Ok(match op {
            "$eq" => Self::equals(value, operand),
            "$ne" => !Self::equals(value, operand),
            "$gt" => Self::compares(value, operand, Ordering::is_gt),
            "$gte" => Self::compares(value, operand, Ordering::is_ge),
            "$lt" => Self::compares(value, operand, Ordering::is_lt),
            "$lte" => Self::compares(value, operand, Ordering::is_le),
            "$in" => list()?.iter().any(|candidate| Self::equals(value, candidate)),
            "$nin" => !list()?.iter().any(|candidate| Self::equals(value, candidate)),
            "$all" => {
                let wanted = list()?;
                match value {
                    Some(Bson::Array(_)) => wanted.iter().all(|w| Self::equals(value, w)),
                    _ => false,
                }
            }
            "$exists" => {
                let should_exist = match operand {
                    Bson::Boolean(b) => *b,
                    other => Comparable::from(other) != Comparable::Number(0.0),
                };
                value.is_some() == should_exist
            }
            "$size" => {
                let size = match operand {
                    Bson::Int32(n) => i64::from(*n),
                    Bson::Int64(n) => *n,
                    _ => return Err(StoreError::InvalidDocument("$size expects an integer".into())),
                };
                matches!(value, Some(Bson::Array(items)) if items.len() as i64 == size)
            }
            "$not" => match operand {
                Bson::Document(ops) => {
                    for (op, operand) in ops {
                        if !Self::operator_matches(value, op, operand)? {
                            return Ok(true);
                        }
                    }
                    false
                }
                _ => return Err(StoreError::InvalidDocument("$not expects a document".into())),
            },
            other => return Err(unsupported(other)),
        })
    }
}

/// Applies an update document of `$`-operators to a document in place.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> StoreResult<()> {
    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| StoreError::InvalidDocument(format!("{op} expects a document")))?;

        for (field, operand) in fields {
            if field == "_id" {
                return Err(StoreError::InvalidDocument("_id is immutable".into()));
            }

            match op.as_str() {
                "$set" => set_path(document, field, operand.clone()),
                "$unset" => unset_path(document, field),
                "$inc" => {
                    let current = lookup(document, field).cloned().unwrap_or(Bson::Int32(0));
                    set_path(document, field, increment(field, &current, operand)?);
                }
                "$push" | "$addToSet" => {
                    let values = match operand {
                        Bson::Document(spec) if spec.contains_key("$each") => match spec.get("$each") {
                            Some(Bson::Array(values)) => values.clone(),
                            _ => return Err(StoreError::InvalidDocument("$each expects an array".into())),
                        },
                        value => vec![value.clone()],
                    };

                    let mut items = array_at(document, field)?;
                    for value in values {
                        let present = items
                            .iter()
                            .any(|item| Comparable::from(item) == Comparable::from(&value));
                        if op == "$push" || !present {
                            items.push(value);
                        }
                    }
                    set_path(document, field, Bson::Array(items));
                }
                "$pull" => {
                    if lookup(document, field).is_none() {
                        continue;
                    }

                    let mut items = array_at(document, field)?;
                    items.retain(|item| !pull_matches(item, operand));
                    set_path(document, field, Bson::Array(items));
                }
                other => return Err(unsupported(other)),
            }
        }
    }

    Ok(())
}

fn pull_matches(item: &Bson, operand: &Bson) -> bool {
    match operand {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => ops
            .iter()
            .all(|(op, operand)| {
                DocumentEvaluator::operator_matches(Some(item), op, operand).unwrap_or(false)
            }),
        value => Comparable::from(item) == Comparable::from(value),
    }
}

fn increment(field: &str, current: &Bson, by: &Bson) -> StoreResult<Bson> {
    Ok(match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map_or(Bson::Int64(i64::from(*a) + i64::from(*b)), Bson::Int32),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a) + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + i64::from(*b)),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (a, b) => match (Comparable::from(a), Comparable::from(b)) {
            (Comparable::Number(a), Comparable::Number(b)) => Bson::Double(a + b),
            _ => {
                return Err(StoreError::InvalidDocument(format!(
                    "cannot increment non-numeric field {field}"
                )));
            }
        },
    })
}

fn array_at(document: &Document, field: &str) -> StoreResult<Vec<Bson>> {
    match lookup(document, field) {
        None | Some(Bson::Null) => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(_) => Err(StoreError::InvalidDocument(format!("{field} is not an array"))),
    }
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}
