use bson::{Bson, Document, de::deserialize_from_bson, oid::ObjectId, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value as JsonValue, from_value, to_value};
use std::{fmt, sync::Arc};

use crate::{
    attributes::AttributeContainer,
    callbacks::Errors,
    error::MapperResult,
    key::{ID_FIELD, TYPE_FIELD},
    model::ModelType,
    value::Value,
};

/// One model instance: its type, its attributes and its persistence state.
///
/// Instances are plain values. Two instances loaded from the same document are
/// independent copies; nothing here is synchronized, so an instance belongs to one
/// caller at a time.
#[derive(Clone)]
pub struct Model {
    model_type: Arc<ModelType>,
    attributes: AttributeContainer,
    new_record: bool,
    destroyed: bool,
    errors: Errors,
}

impl Model {
    /// Creates a new, unsaved instance with defaults applied and an identity assigned.
    pub fn new(model_type: Arc<ModelType>) -> Self {
        let mut attributes = AttributeContainer::new(model_type.name(), model_type.key_set());
        attributes.apply_defaults();
        attributes.ensure_id();

        if model_type.parent().is_some() {
            attributes.write_field(TYPE_FIELD, Bson::String(model_type.name().to_string()));
            attributes.mark_persisted();
        }

        Self {
            model_type,
            attributes,
            new_record: true,
            destroyed: false,
            errors: Errors::default(),
        }
    }

    /// Creates a new instance and writes the given attributes through their keys.
    pub fn with_attributes<K, V>(
        model_type: Arc<ModelType>,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> MapperResult<Self>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut model = Self::new(model_type);
        model.assign(attributes)?;
        Ok(model)
    }

    /// Wraps a stored document. The instance is persisted and clean.
    pub fn load(model_type: Arc<ModelType>, document: Document) -> Self {
        let mut attributes = AttributeContainer::new(model_type.name(), model_type.key_set());
        attributes.load_from_source(document);

        Self {
            model_type,
            attributes,
            new_record: false,
            destroyed: false,
            errors: Errors::default(),
        }
    }

    /// Creates a new instance from a JSON object, writing each member through its key.
    pub fn from_json(model_type: Arc<ModelType>, json: JsonValue) -> MapperResult<Self> {
        let document: Document = from_value(json)?;

        let mut model = Self::new(model_type);
        for (name, value) in &document {
            let name = if name == "id" { ID_FIELD } else { name.as_str() };
            model.write(name, Value::from_bson(value))?;
        }

        Ok(model)
    }

    pub fn model_type(&self) -> &Arc<ModelType> {
        &self.model_type
    }

    pub fn type_name(&self) -> &str {
        self.model_type.name()
    }

    /// The identity, when it is an object id.
    pub fn id(&self) -> Option<ObjectId> {
        match self.attributes.field(ID_FIELD) {
            Some(Bson::ObjectId(id)) => Some(*id),
            _ => None,
        }
    }

    /// The identity in stored form, whatever its type.
    pub fn id_bson(&self) -> Bson {
        self.attributes
            .field(ID_FIELD)
            .cloned()
            .unwrap_or(Bson::Null)
    }

    pub fn read(&self, name: &str) -> MapperResult<Value> {
        self.attributes.read(name)
    }

    pub fn write(&mut self, name: &str, value: impl Into<Value>) -> MapperResult<()> {
        self.attributes.write(name, &value.into())
    }

    /// Writes several attributes; stops at the first failure.
    pub fn assign<K, V>(&mut self, attributes: impl IntoIterator<Item = (K, V)>) -> MapperResult<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in attributes {
            self.write(name.as_ref(), value)?;
        }

        Ok(())
    }

    /// Reads an attribute and deserializes it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> MapperResult<T> {
        let value = self.read(name)?;
        Ok(deserialize_from_bson(value.to_bson())?)
    }

    /// Serializes `value` and writes it through the key's coercion.
    pub fn set_from<T: Serialize>(&mut self, name: &str, value: &T) -> MapperResult<()> {
        let bson = serialize_to_bson(value)?;
        self.write(name, Value::from_bson(&bson))
    }

    pub fn changed_fields(&self) -> Vec<String> {
        self.attributes.changed_fields()
    }

    /// `(name, old, new)` for every changed attribute.
    pub fn changes(&self) -> Vec<(String, Value, Value)> {
        self.attributes.changes()
    }

    pub fn is_changed(&self) -> bool {
        self.attributes.has_changes()
    }

    pub fn attribute_changed(&self, name: &str) -> bool {
        self.attributes.is_changed(name)
    }

    /// The stored form as it will be written.
    pub fn raw_document(&self) -> &Document {
        self.attributes.raw_document()
    }

    pub fn to_document(&self) -> Document {
        self.attributes.raw_document().clone()
    }

    /// JSON rendering of the stored form.
    pub fn to_json(&self) -> MapperResult<JsonValue> {
        Ok(to_value(self.raw_document())?)
    }

    pub fn is_new(&self) -> bool {
        self.new_record
    }

    pub fn is_persisted(&self) -> bool {
        !self.new_record && !self.destroyed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Runs the validators of the model type and stores the errors.
    pub fn validate(&mut self) -> bool {
        self.errors = self.model_type.validate_model(self);
        self.errors.is_empty()
    }

    pub(crate) fn attributes(&self) -> &AttributeContainer {
        &self.attributes
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.new_record = false;
        self.attributes.mark_persisted();
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    /// Reads a physical field, bypassing key coercion.
    pub(crate) fn field(&self, field: &str) -> Option<&Bson> {
        self.attributes.field(field)
    }

    pub(crate) fn set_field(&mut self, field: &str, value: Bson) {
        self.attributes.write_field(field, value);
    }

    pub(crate) fn unset_field(&mut self, field: &str) {
        self.attributes.remove_field(field);
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.model_type.name() == other.model_type.name() && self.attributes == other.attributes
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type", &self.model_type.name())
            .field("attributes", self.attributes.raw_document())
            .field("new_record", &self.new_record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde::Deserialize;

    use super::*;
    use crate::{
        key::KeyDefinition,
        model::ModelRegistry,
        types::TypeTag,
    };

    fn person() -> Arc<ModelType> {
        ModelRegistry::new()
            .define(
                ModelType::builder("Person")
                    .key(KeyDefinition::new("name", TypeTag::String).required())
                    .key(KeyDefinition::new("age", TypeTag::Integer))
                    .key(KeyDefinition::new("tags", TypeTag::Set).default(Vec::<Value>::new()))
                    .key(KeyDefinition::new("profile", TypeTag::Hash)),
            )
            .unwrap()
    }

    #[test]
    fn dirty_tracking_follows_explicit_writes() {
        let mut model = Model::with_attributes(person(), [("name", "John")]).unwrap();

        assert_eq!(model.read("age").unwrap(), Value::Nil);
        assert_eq!(model.changed_fields(), vec!["name".to_string()]);

        model.write("age", 12).unwrap();

        assert!(model.changed_fields().contains(&"age".to_string()));
    }

    #[test]
    fn new_models_have_a_stable_identity() {
        let model = Model::new(person());
        let id = model.id().unwrap();

        assert_eq!(model.read("id").unwrap(), Value::ObjectId(id));
        assert!(model.is_new());
        assert!(!model.is_persisted());
    }

    #[test]
    fn loaded_models_are_clean_and_persisted() {
        let model = Model::load(person(), doc! { "name": "Jane", "age": 40_i64 });

        assert!(model.is_persisted());
        assert!(!model.is_changed());
        assert_eq!(model.read("age").unwrap(), Value::Integer(40));
    }

    #[test]
    fn serde_extraction_and_assignment() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Profile {
            bio: String,
            score: i64,
        }

        let mut model = Model::new(person());
        let profile = Profile { bio: "hi".into(), score: 3 };
        model.set_from("profile", &profile).unwrap();

        assert_eq!(model.get_as::<Profile>("profile").unwrap(), profile);
        assert_eq!(model.get_as::<Option<i64>>("age").unwrap(), None);
    }

    #[test]
    fn json_round_trip() {
        let model = Model::from_json(
            person(),
            serde_json::json!({ "name": "Ann", "age": "33", "tags": ["a", "a", "b"] }),
        )
        .unwrap();

        assert_eq!(model.read("age").unwrap(), Value::Integer(33));
        assert_eq!(
            model.read("tags").unwrap(),
            Value::Set(vec![Value::from("a"), Value::from("b")])
        );

        let json = model.to_json().unwrap();
        assert_eq!(json["name"], "Ann");
        assert_eq!(json["age"], 33);
    }

    #[test]
    fn required_keys_are_validated() {
        let mut model = Model::new(person());

        assert!(!model.validate());
        assert_eq!(model.errors().on("name"), ["can't be blank".to_string()]);

        model.write("name", "Ann").unwrap();
        assert!(model.validate());
    }
}
