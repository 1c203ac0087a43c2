//! Dynamic finders such as `find_by_name_and_age`.
//!
//! A finder name is parsed once into a [`DynamicFinder`] and dispatched through the
//! ordinary criteria path:
//!
//! | form | result |
//! |---|---|
//! | `find_by_a_and_b` | first match or none |
//! | `find_by_a!` | first match, [`MapperError::DocumentNotFound`] otherwise |
//! | `find_all_by_a` | every match |
//! | `find_last_by_a` | last match or none |
//! | `find_or_initialize_by_a` | first match or a new unsaved model |
//! | `find_or_create_by_a` | first match or a new saved model |

use std::{fmt, str::FromStr};
use tracing::debug;

use crate::{
    backend::StoreBackend,
    error::{MapperError, MapperResult},
    model::Model,
    model_query::ModelQuery,
    query::Criteria,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinderKind {
    First,
    Last,
    All,
}

/// What to do when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instantiate {
    None,
    Initialize,
    Create,
}

/// A parsed finder name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicFinder {
    pub fields: Vec<String>,
    pub kind: FinderKind,
    pub raises: bool,
    pub instantiate: Instantiate,
}

impl DynamicFinder {
    /// Parses a finder name.
    ///
    /// # Errors
    ///
    /// [`MapperError::Query`] if the name is not a finder.
    pub fn parse(method: &str) -> MapperResult<Self> {
        let not_a_finder = || MapperError::Query(format!("{method:?} is not a dynamic finder"));

        let (name, raises) = match method.strip_suffix('!') {
            Some(name) => (name, true),
            None => (method, false),
        };

        let (kind, instantiate, rest) = [
            ("find_all_by_", FinderKind::All, Instantiate::None),
            ("find_last_by_", FinderKind::Last, Instantiate::None),
            ("find_or_initialize_by_", FinderKind::First, Instantiate::Initialize),
            ("find_or_create_by_", FinderKind::First, Instantiate::Create),
            ("find_by_", FinderKind::First, Instantiate::None),
        ]
        .into_iter()
        .find_map(|(prefix, kind, instantiate)| {
            name.strip_prefix(prefix).map(|rest| (kind, instantiate, rest))
        })
        .ok_or_else(not_a_finder)?;

        // Only a plain single-result finder can raise.
        if raises && (kind != FinderKind::First || instantiate != Instantiate::None) {
            return Err(not_a_finder());
        }

        let fields = rest
            .split("_and_")
            .map(str::to_string)
            .collect::<Vec<_>>();
        if fields.iter().any(String::is_empty) {
            return Err(not_a_finder());
        }

        Ok(Self {
            fields,
            kind,
            raises,
            instantiate,
        })
    }

    /// Equality criteria pairing each field with its argument.
    ///
    /// # Errors
    ///
    /// [`MapperError::Query`] if the argument count differs from the field count.
    pub fn criteria(&self, arguments: &[Value]) -> MapperResult<Criteria> {
        if arguments.len() != self.fields.len() {
            return Err(MapperError::Query(format!(
                "{self} expects {} argument(s), got {}",
                self.fields.len(),
                arguments.len()
            )));
        }

        Ok(self
            .fields
            .iter()
            .zip(arguments)
            .fold(Criteria::new(), |criteria, (field, value)| {
                criteria.eq(field.clone(), value.clone())
            }))
    }
}

impl FromStr for DynamicFinder {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DynamicFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match (self.kind, self.instantiate) {
            (FinderKind::All, _) => "find_all_by_",
            (FinderKind::Last, _) => "find_last_by_",
            (_, Instantiate::Initialize) => "find_or_initialize_by_",
            (_, Instantiate::Create) => "find_or_create_by_",
            _ => "find_by_",
        };

        write!(f, "{prefix}{}", self.fields.join("_and_"))?;
        if self.raises {
            f.write_str("!")?;
        }

        Ok(())
    }
}

/// Outcome of a dynamic finder.
#[derive(Debug, Clone, PartialEq)]
pub enum FinderResult {
    One(Option<Model>),
    Many(Vec<Model>),
}

impl FinderResult {
    pub fn into_one(self) -> Option<Model> {
        match self {
            FinderResult::One(model) => model,
            FinderResult::Many(models) => models.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<Model> {
        match self {
            FinderResult::One(model) => model.into_iter().collect(),
            FinderResult::Many(models) => models,
        }
    }
}

impl<B: StoreBackend> ModelQuery<'_, B> {
    /// Runs a parsed finder with its arguments, on top of this query's criteria.
    pub async fn dispatch(
        self,
        finder: &DynamicFinder,
        arguments: Vec<Value>,
    ) -> MapperResult<FinderResult> {
        let query = self.merge(finder.criteria(&arguments)?);

        debug!(
            model = %query.model_type().name(),
            finder = %finder,
            "dispatching dynamic finder"
        );

        match finder.kind {
            FinderKind::All => return Ok(FinderResult::Many(query.all().await?)),
            FinderKind::Last => return Ok(FinderResult::One(query.last().await?)),
            FinderKind::First => {}
        }

        if let Some(found) = query.first().await? {
            return Ok(FinderResult::One(Some(found)));
        }

        if finder.raises {
            let wanted = finder
                .fields
                .iter()
                .zip(&arguments)
                .map(|(field, value)| format!("{field}={value:?}"))
                .collect::<Vec<_>>()
                .join(", ");

            return Err(MapperError::DocumentNotFound {
                id: wanted,
                collection: query.collection_name(),
            });
        }

        match finder.instantiate {
            Instantiate::None => Ok(FinderResult::One(None)),
            Instantiate::Initialize | Instantiate::Create => {
                let mut model = Model::with_attributes(
                    query.model_type().clone(),
                    finder.fields.iter().zip(arguments),
                )?;

                if finder.instantiate == Instantiate::Create {
                    query.mapper().save(&mut model).await?;
                }

                Ok(FinderResult::One(Some(model)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        let finder = DynamicFinder::parse("find_by_name_and_age").unwrap();
        assert_eq!(finder.fields, vec!["name", "age"]);
        assert_eq!(finder.kind, FinderKind::First);
        assert!(!finder.raises);

        let finder = DynamicFinder::parse("find_by_email!").unwrap();
        assert!(finder.raises);

        assert_eq!(DynamicFinder::parse("find_all_by_age").unwrap().kind, FinderKind::All);
        assert_eq!(DynamicFinder::parse("find_last_by_age").unwrap().kind, FinderKind::Last);
        assert_eq!(
            DynamicFinder::parse("find_or_initialize_by_name").unwrap().instantiate,
            Instantiate::Initialize
        );
        assert_eq!(
            DynamicFinder::parse("find_or_create_by_name").unwrap().instantiate,
            Instantiate::Create
        );
    }

    #[test]
    fn rejects_non_finders() {
        for name in ["find", "find_by_", "where_name", "find_all_by_age!", "find_by_name_and_"] {
            assert!(
                matches!(DynamicFinder::parse(name), Err(MapperError::Query(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn argument_count_must_match() {
        let finder: DynamicFinder = "find_by_name_and_age".parse().unwrap();

        assert!(finder.criteria(&[Value::from("John")]).is_err());
        assert_eq!(
            finder
                .criteria(&[Value::from("John"), Value::from(30)])
                .unwrap()
                .conditions()
                .len(),
            2
        );
    }

    #[test]
    fn displays_the_original_name() {
        for name in ["find_by_name!", "find_or_create_by_name_and_age", "find_all_by_age"] {
            assert_eq!(DynamicFinder::parse(name).unwrap().to_string(), name);
        }
    }
}
