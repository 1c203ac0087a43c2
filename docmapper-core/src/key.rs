//! Key definitions.
//!
//! A [`KeyDefinition`] is what a model declaration writes: a name, a [`TypeTag`] and
//! options. When the model type is defined in the
//! [`ModelRegistry`](crate::model::ModelRegistry) every definition is resolved into a
//! [`Key`], whose coercion is fixed from then on.

use bson::{Bson, oid::ObjectId};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    error::{MapperError, MapperResult},
    types::{Coercion, CoercionRegistry, TypeTag},
    value::Value,
};

/// Physical name of the identity field.
pub const ID_FIELD: &str = "_id";
/// Physical name of the type discriminator field.
pub const TYPE_FIELD: &str = "_type";

type DefaultGenerator = Arc<dyn Fn() -> Value + Send + Sync>;

/// Default value of a key.
#[derive(Clone)]
pub enum DefaultValue {
    /// Cloned on every use, so instances never share a mutable default.
    Static(Value),
    /// Invoked every time a default is needed.
    Generator(DefaultGenerator),
}

impl DefaultValue {
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        DefaultValue::Generator(Arc::new(f))
    }

    /// Produces a fresh default value.
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Generator(generate) => generate(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Declared, unresolved key.
///
/// # Example
///
/// ```ignore
/// KeyDefinition::new("age", TypeTag::Integer)
///     .default(0)
///     .alias("a")
///     .required();
/// ```
#[derive(Debug, Clone)]
pub struct KeyDefinition {
    pub name: String,
    pub type_tag: TypeTag,
    pub alias: Option<String>,
    pub default: Option<DefaultValue>,
    pub required: bool,
    pub strict: bool,
    /// Element type for container keys.
    pub typecast: Option<TypeTag>,
}

impl KeyDefinition {
    pub fn new(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
            alias: None,
            default: None,
            required: false,
            strict: false,
            typecast: None,
        }
    }

    /// Stores the key under a different physical field name.
    pub fn alias(mut self, field: impl Into<String>) -> Self {
        self.alias = Some(field.into());
        self
    }

    /// Static default, copied for each instance.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    /// Default produced by a generator, called each time a default is needed.
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::generator(f));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Surface typecast failures instead of storing `null`.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Element type for `Array`/`Set` keys.
    pub fn typecast(mut self, element: TypeTag) -> Self {
        self.typecast = Some(element);
        self
    }

    /// Resolves the definition against a coercion registry.
    pub fn resolve(self, model: &str, coercions: &CoercionRegistry) -> MapperResult<Key> {
        let invalid = |reason: String| MapperError::InvalidKey {
            model: model.to_string(),
            key: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("key name is empty".into()));
        }

        if self.name.contains('.') || self.name.starts_with('$') {
            return Err(invalid("key names cannot contain '.' or start with '$'".into()));
        }

        let coercion = coercions
            .resolve(&self.type_tag)
            .ok_or_else(|| invalid(format!("no coercion registered for type {}", self.type_tag)))?;

        let element = match &self.typecast {
            Some(tag) if !self.type_tag.is_container() => {
                return Err(invalid(format!(
                    "element typecast {tag} requires an Array or Set key, found {}",
                    self.type_tag
                )));
            }
            Some(tag) => Some((
                tag.clone(),
                coercions
                    .resolve(tag)
                    .ok_or_else(|| invalid(format!("no coercion registered for type {tag}")))?,
            )),
            None => None,
        };

        Ok(Key {
            field: self.alias.clone().unwrap_or_else(|| self.name.clone()),
            coercion,
            element,
            definition: self,
        })
    }
}

/// A resolved key: definition plus coercions.
#[derive(Clone)]
pub struct Key {
    definition: KeyDefinition,
    field: String,
    coercion: Arc<dyn Coercion>,
    element: Option<(TypeTag, Arc<dyn Coercion>)>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.definition.name)
            .field("field", &self.field)
            .field("type", &self.definition.type_tag)
            .finish()
    }
}

impl Key {
    /// Accessor name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Physical field name in the stored document.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn type_tag(&self) -> &TypeTag {
        &self.definition.type_tag
    }

    pub fn definition(&self) -> &KeyDefinition {
        &self.definition
    }

    pub fn is_required(&self) -> bool {
        self.definition.required
    }

    pub fn is_identity(&self) -> bool {
        self.field == ID_FIELD
    }

    pub fn has_default(&self) -> bool {
        self.definition.default.is_some()
    }

    /// Produces the default value, if the key declares one.
    pub fn default_value(&self) -> Option<Value> {
        self.definition.default.as_ref().map(DefaultValue::produce)
    }

    /// Converts a stored value into an application value.
    ///
    /// An absent identity value generates a fresh object id; memoizing it is up to
    /// the caller.
    pub fn get(&self, raw: Option<&Bson>) -> Value {
        let raw = match raw {
            None | Some(Bson::Null) if self.is_identity() => {
                return Value::ObjectId(ObjectId::new());
            }
            None => return self.coercion.from_store(&Bson::Null),
            Some(raw) => raw,
        };

        match (self.coercion.from_store(raw), &self.element) {
            (Value::Array(items), Some((_, element))) => Value::Array(
                items
                    .iter()
                    .map(|item| element.from_store(&element.to_store(item)))
                    .collect(),
            ),
            (Value::Set(items), Some((_, element))) => Value::Set(
                items
                    .iter()
                    .map(|item| element.from_store(&element.to_store(item)))
                    .collect(),
            ),
            (value, _) => value,
        }
    }

    /// Converts an application value into its stored form.
    ///
    /// Lenient keys turn coercion failures into `null`; strict keys report them.
    pub fn set(&self, value: &Value) -> MapperResult<Bson> {
        let stored = self.cast(&*self.coercion, value)?;

        match (stored, &self.element) {
            (Bson::Array(items), Some((_, element))) => Ok(Bson::Array(
                items
                    .iter()
                    .map(|item| self.cast(&**element, &element.from_store(item)))
                    .collect::<MapperResult<Vec<_>>>()?,
            )),
            (stored, _) => Ok(stored),
        }
    }

    fn cast(&self, coercion: &dyn Coercion, value: &Value) -> MapperResult<Bson> {
        match coercion.cast(value) {
            Ok(bson) => Ok(bson),
            Err(source) if self.definition.strict => Err(MapperError::Typecast {
                key: self.definition.name.clone(),
                source,
            }),
            Err(_) => Ok(Bson::Null),
        }
    }

    /// Coerces a query value. Lists are coerced element-wise when `element_wise` is set.
    pub fn cast_query_value(&self, value: &Value, element_wise: bool) -> Bson {
        let coerce_one = |item: &Value| -> Bson {
            match &self.element {
                Some((_, element)) => element.to_store(item),
                None if self.definition.type_tag.is_container() => item.to_bson(),
                None => self.coercion.to_store(item),
            }
        };

        match value {
            Value::Array(items) | Value::Set(items) if element_wise => {
                Bson::Array(items.iter().map(coerce_one).collect())
            }
            Value::Array(_) | Value::Set(_) => value.to_bson(),
            other => coerce_one(other),
        }
    }
}

/// The keys of one model type, indexed by accessor and by physical field name.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<Arc<Key>>,
    by_name: HashMap<String, usize>,
    by_field: HashMap<String, usize>,
    /// Reject reads and writes of undeclared names.
    static_keys: bool,
    /// Fields that are kept on load although no key declares them (association storage).
    passthrough: Vec<String>,
}

impl KeySet {
    pub fn new(static_keys: bool) -> Self {
        Self {
            static_keys,
            ..Default::default()
        }
    }

    /// Adds a key, replacing any key with the same name.
    pub fn insert(&mut self, key: Key) {
        let key = Arc::new(key);

        match self.by_name.get(key.name()).copied() {
            Some(index) => {
                self.by_field.remove(self.keys[index].field());
                self.by_field.insert(key.field().to_string(), index);
                self.keys[index] = key;
            }
            None => {
                let index = self.keys.len();
                self.by_name.insert(key.name().to_string(), index);
                self.by_field.insert(key.field().to_string(), index);
                self.keys.push(key);
            }
        }
    }

    pub(crate) fn add_passthrough(&mut self, field: impl Into<String>) {
        let field = field.into();

        if !self.passthrough.contains(&field) {
            self.passthrough.push(field);
        }
    }

    /// Looks a key up by accessor name, physical field name, or `id`.
    pub fn get(&self, name: &str) -> Option<&Arc<Key>> {
        let name = if name == "id" { ID_FIELD } else { name };

        self.by_name
            .get(name)
            .or_else(|| self.by_field.get(name))
            .map(|index| &self.keys[*index])
    }

    pub fn by_field(&self, field: &str) -> Option<&Arc<Key>> {
        self.by_field.get(field).map(|index| &self.keys[*index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Key>> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn is_static(&self) -> bool {
        self.static_keys
    }

    /// Whether a stored field survives loading.
    pub fn keeps_field(&self, field: &str) -> bool {
        !self.static_keys
            || field == ID_FIELD
            || field == TYPE_FIELD
            || self.by_field.contains_key(field)
            || self.passthrough.iter().any(|f| f == field)
    }

    /// Maps an accessor name to its physical field; unknown names map to themselves.
    pub fn physical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).map_or(name, |key| key.field())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(definition: KeyDefinition) -> Key {
        definition
            .resolve("Test", &CoercionRegistry::new())
            .unwrap()
    }

    #[test]
    fn identity_key_generates_id_when_absent() {
        let key = resolve(KeyDefinition::new(ID_FIELD, TypeTag::ObjectId));

        assert!(matches!(key.get(None), Value::ObjectId(_)));
        assert_ne!(key.get(None), key.get(None));
    }

    #[test]
    fn lenient_keys_store_null_and_strict_keys_fail() {
        let lenient = resolve(KeyDefinition::new("age", TypeTag::Integer));
        let strict = resolve(KeyDefinition::new("age", TypeTag::Integer).strict());

        assert_eq!(lenient.set(&Value::from("abc")).unwrap(), Bson::Null);
        assert!(matches!(
            strict.set(&Value::from("abc")),
            Err(MapperError::Typecast { .. })
        ));
    }

    #[test]
    fn element_typecast_applies_to_each_element() {
        let key = resolve(KeyDefinition::new("scores", TypeTag::Array).typecast(TypeTag::Integer));

        assert_eq!(
            key.set(&Value::from(vec!["1", "2", "x"])).unwrap(),
            Bson::Array(vec![Bson::Int64(1), Bson::Int64(2), Bson::Null])
        );
        assert_eq!(
            key.get(Some(&Bson::Array(vec![Bson::String("3".into())]))),
            Value::Array(vec![Value::Integer(3)])
        );
    }

    #[test]
    fn alias_changes_the_physical_field() {
        let key = resolve(KeyDefinition::new("name", TypeTag::String).alias("n"));
        let mut keys = KeySet::new(true);
        keys.insert(key);

        assert_eq!(keys.get("name").unwrap().field(), "n");
        assert_eq!(keys.get("n").unwrap().name(), "name");
        assert_eq!(keys.physical_name("name"), "n");
        assert_eq!(keys.physical_name("other"), "other");
    }

    #[test]
    fn static_defaults_are_copied_and_generators_rerun() {
        use std::sync::atomic::{AtomicI64, Ordering};

        let counter = Arc::new(AtomicI64::new(0));
        let seen = counter.clone();
        let generated = resolve(
            KeyDefinition::new("n", TypeTag::Integer)
                .default_with(move || Value::from(seen.fetch_add(1, Ordering::SeqCst))),
        );
        let fixed = resolve(KeyDefinition::new("tags", TypeTag::Array).default(Vec::<Value>::new()));

        assert_eq!(generated.default_value(), Some(Value::Integer(0)));
        assert_eq!(generated.default_value(), Some(Value::Integer(1)));

        let mut first = fixed.default_value().unwrap();
        if let Value::Array(items) = &mut first {
            items.push(Value::from("mutated"));
        }
        assert_eq!(fixed.default_value(), Some(Value::Array(vec![])));
    }

    #[test]
    fn invalid_definitions_fail_at_resolution() {
        let coercions = CoercionRegistry::new();

        assert!(matches!(
            KeyDefinition::new("a.b", TypeTag::String).resolve("Test", &coercions),
            Err(MapperError::InvalidKey { .. })
        ));
        assert!(matches!(
            KeyDefinition::new("a", TypeTag::Custom("Nope".into())).resolve("Test", &coercions),
            Err(MapperError::InvalidKey { .. })
        ));
        assert!(matches!(
            KeyDefinition::new("a", TypeTag::String)
                .typecast(TypeTag::Integer)
                .resolve("Test", &coercions),
            Err(MapperError::InvalidKey { .. })
        ));
    }
}
