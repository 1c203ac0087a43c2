//! Query criteria construction and rendering.
//!
//! A [`Criteria`] accumulates conditions, sort keys, paging and a projection through a
//! chainable API. Conditions are keyed by a typed `(field, Operator)` pair: writing the
//! same pair twice keeps the last value, distinct pairs accumulate.
//!
//! Rendering ([`Criteria::render`]) produces a store-native [`Query`]: the filter is a
//! BSON document using `$`-prefixed operators, field names are translated from key
//! accessors to physical names, and values are coerced through the declared keys.
//!
//! ```ignore
//! use docmapper::query::{Criteria, SortDirection};
//!
//! let criteria = Criteria::new()
//!     .gt("age", 27)
//!     .sort("age", SortDirection::Asc)
//!     .limit(1)
//!     .skip(1);
//! ```

use bson::{Bson, Document, doc};
use std::{fmt, str::FromStr};

use crate::{
    error::{MapperError, MapperResult},
    key::KeySet,
    value::Value,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Store-native direction value.
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(SortDirection::Asc),
            "desc" | "descending" | "-1" => Ok(SortDirection::Desc),
            other => Err(MapperError::Query(format!("unknown sort direction {other:?}"))),
        }
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal to (default).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Array field contains all of the values.
    All,
    /// Field is one of the values.
    In,
    /// Field is none of the values.
    Nin,
    /// Field exists (`true`) or is missing (`false`).
    Exists,
    /// Array field has exactly this many elements.
    Size,
}

impl Operator {
    pub const ALL: [Operator; 11] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::All,
        Operator::In,
        Operator::Nin,
        Operator::Exists,
        Operator::Size,
    ];

    /// Store-native operator name.
    pub fn as_store_operator(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::All => "$all",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Exists => "$exists",
            Operator::Size => "$size",
        }
    }

    /// Operators whose value is a list.
    pub fn takes_list(self) -> bool {
        matches!(self, Operator::All | Operator::In | Operator::Nin)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_store_operator())
    }
}

impl FromStr for Operator {
    type Err = MapperError;

    /// Parses an operator suffix such as `gt`, `$gte` or `in`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_start_matches('$');

        Operator::ALL
            .into_iter()
            .find(|op| &op.as_store_operator()[1..] == name)
            .ok_or_else(|| MapperError::Query(format!("unsupported operator {s:?}")))
    }
}

/// One `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

/// A store-native query, produced by [`Criteria::render`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Filter document using `$`-prefixed operators.
    pub filter: Document,
    /// Sort keys in priority order.
    pub sort: Vec<Sort>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip.
    pub skip: Option<usize>,
    /// Physical field names to return; empty means all fields.
    pub projection: Vec<String>,
}

impl Query {
    /// Creates a query matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query with the given filter.
    pub fn filter(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Sort keys as a store-native document.
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }

        Some(
            self.sort
                .iter()
                .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_i32())))
                .collect(),
        )
    }

    /// Projection as a store-native document.
    pub fn projection_document(&self) -> Option<Document> {
        if self.projection.is_empty() {
            return None;
        }

        Some(
            self.projection
                .iter()
                .map(|field| (field.clone(), Bson::Int32(1)))
                .collect(),
        )
    }
}

/// Chainable query criteria.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    conditions: Vec<Condition>,
    any_of: Vec<Criteria>,
    sort: Vec<Sort>,
    limit: Option<usize>,
    skip: Option<usize>,
    projection: Vec<String>,
    /// First construction error, surfaced by `render`.
    error: Option<MapperError>,
}

impl Criteria {
    /// Creates empty criteria matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition. The same `(field, op)` pair is overwritten.
    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();

        match self
            .conditions
            .iter_mut()
            .find(|c| c.field == field && c.op == op)
        {
            Some(existing) => existing.value = value,
            None => self.conditions.push(Condition { field, op, value }),
        }

        self
    }

    /// Adds a condition with the operator given by name (`"gt"`, `"$in"`, ...).
    ///
    /// An unknown operator is reported when the criteria is rendered.
    pub fn filter_with(self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        match op.parse::<Operator>() {
            Ok(op) => self.filter(field, op, value),
            Err(err) => self.fail(err),
        }
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Eq, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Ne, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Gt, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Gte, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Lt, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Lte, value)
    }

    /// Array field contains every value.
    pub fn all(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(field, Operator::All, values)
    }

    /// Field is one of the values.
    pub fn any_of(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(field, Operator::In, values)
    }

    /// Field is none of the values.
    pub fn none_of(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(field, Operator::Nin, values)
    }

    pub fn exists(self, field: impl Into<String>, should_exist: bool) -> Self {
        self.filter(field, Operator::Exists, should_exist)
    }

    pub fn size(self, field: impl Into<String>, size: i64) -> Self {
        self.filter(field, Operator::Size, size)
    }

    /// Matches documents satisfying any of the given criteria.
    pub fn or(mut self, alternatives: impl IntoIterator<Item = Criteria>) -> Self {
        self.any_of.extend(alternatives);
        self
    }

    /// Appends a sort key. A field already sorted on keeps its earlier direction.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();

        if !self.sort.iter().any(|s| s.field == field) {
            self.sort.push(Sort { field, direction });
        }

        self
    }

    /// Appends sort keys from a spec such as `"name asc, age desc"`.
    pub fn order(self, spec: &str) -> Self {
        let mut criteria = self;

        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut words = part.split_whitespace();
            let field = words.next().unwrap_or_default().to_string();
            let direction = match words.next() {
                None => Ok(SortDirection::Asc),
                Some(word) => word.parse::<SortDirection>(),
            };

            criteria = match (direction, words.next()) {
                (Ok(direction), None) => criteria.sort(field, direction),
                (Err(err), _) => criteria.fail(err),
                (Ok(_), Some(extra)) => criteria.fail(MapperError::Query(format!(
                    "unexpected {extra:?} in sort spec {part:?}"
                ))),
            };
        }

        criteria
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Restricts the returned fields.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();

            if !self.projection.contains(&field) {
                self.projection.push(field);
            }
        }

        self
    }

    /// Merges another criteria into this one.
    ///
    /// Conditions of `other` overwrite matching `(field, op)` pairs, sort keys are
    /// appended as tie-breakers, paging and projection of `other` win when set.
    pub fn merge(mut self, other: Criteria) -> Self {
        for condition in other.conditions {
            self = self.filter(condition.field, condition.op, condition.value);
        }

        for sort in other.sort {
            self = self.sort(sort.field, sort.direction);
        }

        self.any_of.extend(other.any_of);
        self.limit = other.limit.or(self.limit);
        self.skip = other.skip.or(self.skip);

        if !other.projection.is_empty() {
            self.projection = other.projection;
        }

        if self.error.is_none() {
            self.error = other.error;
        }

        self
    }

    fn fail(mut self, err: MapperError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }

        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn sorts(&self) -> &[Sort] {
        &self.sort
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn skip_value(&self) -> Option<usize> {
        self.skip
    }

    /// Whether the criteria constrains anything besides paging and projection.
    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty() || !self.any_of.is_empty()
    }

    /// Every operator used, including nested alternatives.
    pub fn operators(&self) -> Vec<Operator> {
        let mut ops = self.conditions.iter().map(|c| c.op).collect::<Vec<_>>();

        for alternative in &self.any_of {
            ops.extend(alternative.operators());
        }

        ops
    }

    /// Returns the criteria with the sort reversed (`_id` ascending when unsorted).
    pub fn reversed(mut self) -> Self {
        if self.sort.is_empty() {
            self.sort.push(Sort {
                field: crate::key::ID_FIELD.to_string(),
                direction: SortDirection::Desc,
            });
        } else {
            for sort in &mut self.sort {
                sort.direction = sort.direction.reverse();
            }
        }

        self
    }

    /// Renders the criteria into a store-native query.
    ///
    /// With `keys`, accessor names are translated to physical names and values are
    /// coerced through the declared key types.
    pub fn render(&self, keys: Option<&KeySet>) -> MapperResult<Query> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let physical = |name: &str| -> String {
            keys.map_or(name, |keys| keys.physical_name(name)).to_string()
        };

        Ok(Query {
            filter: self.render_filter(keys)?,
            sort: self
                .sort
                .iter()
                .map(|sort| Sort {
                    field: physical(&sort.field),
                    direction: sort.direction,
                })
                .collect(),
            limit: self.limit,
            skip: self.skip,
            projection: self.projection.iter().map(|f| physical(f)).collect(),
        })
    }

    fn render_filter(&self, keys: Option<&KeySet>) -> MapperResult<Document> {
        let mut filter = Document::new();

        for condition in &self.conditions {
            let key = keys.and_then(|keys| keys.get(&condition.field));
            let field = key.map_or(condition.field.as_str(), |key| key.field());
            let (op, value) = Self::render_condition(condition, key.map(|k| &**k))?;

            match (op, filter.get_mut(field)) {
                (Operator::Eq, None) => {
                    filter.insert(field, value);
                }
                (op, None) => {
                    filter.insert(field, doc! { op.as_store_operator(): value });
                }
                (op, Some(Bson::Document(existing))) if is_operator_document(existing) => {
                    merge_operator(existing, op, value);
                }
                (Operator::Eq, Some(existing)) => {
                    *existing = value;
                }
                (op, Some(existing)) => {
                    // A bare equality was rendered first; fold it into an operator document.
                    let mut operators = doc! { "$eq": existing.clone() };
                    merge_operator(&mut operators, op, value);
                    *existing = Bson::Document(operators);
                }
            }
        }

        if !self.any_of.is_empty() {
            filter.insert(
                "$or",
                self.any_of
                    .iter()
                    .map(|alternative| alternative.render_filter(keys).map(Bson::Document))
                    .collect::<MapperResult<Vec<_>>>()?,
            );
        }

        Ok(filter)
    }

    fn render_condition(
        condition: &Condition,
        key: Option<&crate::key::Key>,
    ) -> MapperResult<(Operator, Bson)> {
        let malformed = |expected: &str| {
            MapperError::Query(format!(
                "{} on {} expects {expected}, got {}",
                condition.op,
                condition.field,
                condition.value.kind()
            ))
        };

        let coerce = |value: &Value, element_wise: bool| match key {
            Some(key) => key.cast_query_value(value, element_wise),
            None => value.to_bson(),
        };

        match condition.op {
            Operator::Exists => match condition.value {
                Value::Boolean(b) => Ok((Operator::Exists, Bson::Boolean(b))),
                _ => Err(malformed("a boolean")),
            },
            Operator::Size => match condition.value {
                Value::Integer(n) if n >= 0 => Ok((Operator::Size, Bson::Int64(n))),
                _ => Err(malformed("a non-negative integer")),
            },
            op if op.takes_list() => match &condition.value {
                Value::Array(_) | Value::Set(_) => Ok((op, coerce(&condition.value, true))),
                _ => Err(malformed("a list")),
            },
            Operator::Eq
                if matches!(condition.value, Value::Array(_) | Value::Set(_))
                    && !key.is_some_and(|k| k.type_tag().is_container()) =>
            {
                // Equality against a list on a scalar key means membership.
                Ok((Operator::In, coerce(&condition.value, true)))
            }
            op => Ok((op, coerce(&condition.value, false))),
        }
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Adds `op: value` to an operator document for one field.
///
/// Two membership lists narrow to their intersection, exclusion and containment lists
/// widen to their union; any other repeated operator keeps the later value.
fn merge_operator(operators: &mut Document, op: Operator, value: Bson) {
    let name = op.as_store_operator();

    let replacement = match (op, operators.get_mut(name), value) {
        (Operator::In, Some(Bson::Array(previous)), Bson::Array(next)) => {
            previous.retain(|item| next.contains(item));
            None
        }
        (Operator::Nin | Operator::All, Some(Bson::Array(previous)), Bson::Array(next)) => {
            for item in next {
                if !previous.contains(&item) {
                    previous.push(item);
                }
            }
            None
        }
        (_, _, value) => Some(value),
    };

    if let Some(value) = replacement {
        operators.insert(name, value);
    }
}
