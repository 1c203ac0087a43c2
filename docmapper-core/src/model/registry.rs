use bson::{Bson, Document};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use tracing::debug;

use crate::{
    association::{AssociationDescriptor, AssociationKind},
    error::{MapperError, MapperResult, TypecastError},
    inflect,
    key::{DefaultValue, ID_FIELD, KeyDefinition, KeySet, TYPE_FIELD},
    model::{Model, ModelType, ModelTypeBuilder},
    types::{CastResult, Coercion, CoercionRegistry, TypeTag},
    value::Value,
};

/// Process-wide table of model types.
///
/// The registry is created once by the application bootstrap and shared behind an
/// `Arc`. Association targets and embedded key types are looked up here by name on
/// first use, so types may be defined in any order. [`ModelRegistry::clear`] drops every
/// definition, for reload scenarios and tests.
#[derive(Debug)]
pub struct ModelRegistry {
    this: Weak<ModelRegistry>,
    models: RwLock<HashMap<String, Arc<ModelType>>>,
    coercions: RwLock<CoercionRegistry>,
}

impl ModelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            models: RwLock::new(HashMap::new()),
            coercions: RwLock::new(CoercionRegistry::new()),
        })
    }

    /// Registers a model type, replacing any type with the same name.
    ///
    /// Key types are resolved here, and the implicit keys are added: `_id`, `_type`,
    /// foreign keys of `belongs_to` associations and id lists of `in_array`
    /// associations.
    ///
    /// # Errors
    ///
    /// [`MapperError::InvalidKey`] and [`MapperError::AssociationConfiguration`] for
    /// malformed declarations, [`MapperError::UnknownModel`] for an unknown parent.
    pub fn define(&self, builder: ModelTypeBuilder) -> MapperResult<Arc<ModelType>> {
        let ModelTypeBuilder {
            name,
            collection,
            embeddable,
            dynamic_keys,
            parent,
            keys: declared,
            associations: declared_associations,
            callbacks: own_callbacks,
            scopes: own_scopes,
        } = builder;

        if name.trim().is_empty() {
            return Err(MapperError::InvalidOperation("model type name is empty".into()));
        }

        let parent = parent.map(|p| self.resolve(&p)).transpose()?;

        let mut definitions = parent
            .as_ref()
            .map(|p| p.definitions.clone())
            .unwrap_or_default();
        let mut associations = parent
            .as_ref()
            .map(|p| p.associations.clone())
            .unwrap_or_default();

        if !definitions.iter().any(|d| d.name == ID_FIELD) {
            definitions.push(KeyDefinition::new(ID_FIELD, TypeTag::ObjectId));
        }
        if !definitions.iter().any(|d| d.name == TYPE_FIELD) {
            definitions.push(KeyDefinition::new(TYPE_FIELD, TypeTag::String));
        }

        for definition in declared {
            upsert(&mut definitions, definition);
        }

        for (kind, association, options) in declared_associations {
            let descriptor = AssociationDescriptor::new(kind, association, &name, options)?;

            match kind {
                AssociationKind::BelongsTo => {
                    implicit(
                        &mut definitions,
                        KeyDefinition::new(descriptor.foreign_key(), TypeTag::ObjectId),
                    );
                    if let Some(type_field) = descriptor.type_field() {
                        implicit(&mut definitions, KeyDefinition::new(type_field, TypeTag::String));
                    }
                }
                AssociationKind::HasMany if descriptor.options().in_array.is_some() => {
                    implicit(
                        &mut definitions,
                        KeyDefinition::new(descriptor.foreign_key(), TypeTag::Array)
                            .typecast(TypeTag::ObjectId)
                            .default(Vec::<Value>::new()),
                    );
                }
                _ => {}
            }

            associations.retain(|a| a.name() != descriptor.name());
            associations.push(Arc::new(descriptor));
        }

        if embeddable {
            self.register_embedded(&name);
        }
        for definition in &definitions {
            for tag in [Some(&definition.type_tag), definition.typecast.as_ref()]
                .into_iter()
                .flatten()
            {
                if let TypeTag::Embedded(target) = tag {
                    self.register_embedded(target);
                }
            }
        }

        let keys = self.resolve_keys(&name, !dynamic_keys, &definitions, &associations)?;

        let collection = match (embeddable, collection) {
            (true, _) => None,
            (false, Some(collection)) => Some(collection),
            (false, None) => parent
                .as_ref()
                .and_then(|p| p.collection.clone())
                .or_else(|| Some(inflect::collection_name(&name))),
        };

        let mut callbacks = parent
            .as_ref()
            .map(|p| p.callbacks.clone())
            .unwrap_or_default();
        callbacks.extend(&own_callbacks);

        let mut scopes = parent
            .as_ref()
            .map(|p| p.scopes.clone())
            .unwrap_or_default();
        scopes.extend(own_scopes);

        let model_type = Arc::new(ModelType {
            name: name.clone(),
            collection,
            embeddable,
            parent: parent.map(|p| p.name.clone()),
            keys: Arc::new(keys),
            definitions,
            associations,
            callbacks,
            scopes,
        });

        debug!(
            model = %name,
            collection = ?model_type.collection,
            keys = model_type.keys.len(),
            associations = model_type.associations.len(),
            "defined model type"
        );

        self.models.write().insert(name, model_type.clone());

        Ok(model_type)
    }

    fn resolve_keys(
        &self,
        model: &str,
        static_keys: bool,
        definitions: &[KeyDefinition],
        associations: &[Arc<AssociationDescriptor>],
    ) -> MapperResult<KeySet> {
        let coercions = self.coercions.read().clone();
        let mut keys = KeySet::new(static_keys);

        for definition in definitions {
            let key = definition.clone().resolve(model, &coercions)?;

            if let Some(DefaultValue::Static(default)) = &definition.default {
                key.set(default).map_err(|err| MapperError::InvalidKey {
                    model: model.to_string(),
                    key: definition.name.clone(),
                    reason: format!("default rejected: {err}"),
                })?;
            }

            keys.insert(key);
        }

        for association in associations {
            if association.kind() != AssociationKind::BelongsTo
                && association.options().in_array.is_none()
            {
                keys.add_passthrough(association.embedded_field());
            }
        }

        Ok(keys)
    }

    fn register_embedded(&self, model: &str) {
        let mut coercions = self.coercions.write();

        if !coercions.contains(model) {
            coercions.register(
                model,
                Arc::new(EmbeddedCoercion {
                    model: model.to_string(),
                    registry: self.this.clone(),
                }),
            );
        }
    }

    /// Adds a key to a registered type. Adding a key whose name exists is a no-op.
    pub fn add_key(&self, model: &str, definition: KeyDefinition) -> MapperResult<Arc<ModelType>> {
        let existing = self.resolve(model)?;

        if existing.definitions.iter().any(|d| d.name == definition.name) {
            return Ok(existing);
        }

        if let TypeTag::Embedded(target) = &definition.type_tag {
            self.register_embedded(target);
        }

        let coercions = self.coercions.read().clone();
        let key = definition.clone().resolve(model, &coercions)?;

        let mut updated = (*existing).clone();
        let mut keys = (*updated.keys).clone();
        keys.insert(key);
        updated.keys = Arc::new(keys);
        updated.definitions.push(definition);

        let updated = Arc::new(updated);
        self.models
            .write()
            .insert(model.to_string(), updated.clone());

        debug!(model = %model, keys = updated.keys.len(), "added key");

        Ok(updated)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModelType>> {
        self.models.read().get(name).cloned()
    }

    /// Looks a model type up by name.
    ///
    /// # Errors
    ///
    /// [`MapperError::UnknownModel`] if no type is registered under the name.
    pub fn resolve(&self, name: &str) -> MapperResult<Arc<ModelType>> {
        self.get(name)
            .ok_or_else(|| MapperError::UnknownModel(name.to_string()))
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.models.read().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Types inheriting from `name`, directly or not.
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let models = self.models.read();
        let mut found = Vec::new();
        let mut frontier = vec![name.to_string()];

        while let Some(current) = frontier.pop() {
            for model in models.values() {
                if model.parent.as_deref() == Some(current.as_str()) && !found.contains(&model.name) {
                    found.push(model.name.clone());
                    frontier.push(model.name.clone());
                }
            }
        }

        found.sort();
        found
    }

    /// Checks every association target and embedded key type against the registered
    /// types.
    ///
    /// Call once every type is defined; conflicts that depend on the target's
    /// embeddability surface here instead of at first access.
    pub fn validate(&self) -> MapperResult<()> {
        let models = self.models.read().values().cloned().collect::<Vec<_>>();

        for model in &models {
            for association in &model.associations {
                // A polymorphic belongs_to names its target through the stored type.
                if association.kind() == AssociationKind::BelongsTo
                    && association.options().polymorphic
                    && self.get(association.target()).is_none()
                {
                    continue;
                }

                let target = self.get(association.target()).ok_or_else(|| {
                    MapperError::AssociationConfiguration {
                        model: model.name.clone(),
                        association: association.name().to_string(),
                        reason: format!("unknown target type {}", association.target()),
                    }
                })?;

                association.proxy_kind(target.embeddable)?;
            }

            for definition in &model.definitions {
                for tag in [Some(&definition.type_tag), definition.typecast.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    if let TypeTag::Embedded(target) = tag
                        && !self.get(target).is_some_and(|t| t.embeddable)
                    {
                        return Err(MapperError::InvalidKey {
                            model: model.name.clone(),
                            key: definition.name.clone(),
                            reason: format!("{target} is not a registered embeddable type"),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Drops every model type and custom coercion.
    pub fn clear(&self) {
        self.models.write().clear();
        *self.coercions.write() = CoercionRegistry::new();
        debug!("cleared model registry");
    }

    /// Registers a coercion for [`TypeTag::Custom`] keys. Affects types defined later.
    pub fn register_coercion(&self, name: impl Into<String>, coercion: Arc<dyn Coercion>) {
        self.coercions.write().register(name, coercion);
    }

    pub fn coercions(&self) -> CoercionRegistry {
        self.coercions.read().clone()
    }

    /// Builds a model from a stored document.
    ///
    /// The concrete type is taken from the document's `_type` when it names a
    /// registered type, `fallback` otherwise.
    pub fn instantiate(&self, fallback: &Arc<ModelType>, document: Document) -> Model {
        let model_type = match document.get(TYPE_FIELD) {
            Some(Bson::String(name)) if name != &fallback.name => {
                self.get(name).unwrap_or_else(|| fallback.clone())
            }
            _ => fallback.clone(),
        };

        Model::load(model_type, document)
    }

    /// Builds a model of the named type from a stored document.
    pub fn load(&self, model: &str, document: Document) -> MapperResult<Model> {
        Ok(self.instantiate(&self.resolve(model)?, document))
    }

    /// Creates a new, unsaved instance of the named type.
    pub fn build(&self, model: &str) -> MapperResult<Model> {
        Ok(Model::new(self.resolve(model)?))
    }
}

fn upsert(definitions: &mut Vec<KeyDefinition>, definition: KeyDefinition) {
    match definitions.iter_mut().find(|d| d.name == definition.name) {
        Some(existing) => *existing = definition,
        None => definitions.push(definition),
    }
}

/// Adds a definition unless one with the same name was declared explicitly.
fn implicit(definitions: &mut Vec<KeyDefinition>, definition: KeyDefinition) {
    if !definitions.iter().any(|d| d.name == definition.name) {
        definitions.push(definition);
    }
}

/// Coercion for keys holding an embedded model, resolved lazily through the registry.
struct EmbeddedCoercion {
    model: String,
    registry: Weak<ModelRegistry>,
}

impl EmbeddedCoercion {
    fn model_type(&self) -> Option<(Arc<ModelRegistry>, Arc<ModelType>)> {
        let registry = self.registry.upgrade()?;
        let model_type = registry.get(&self.model)?;
        Some((registry, model_type))
    }
}

impl Coercion for EmbeddedCoercion {
    fn cast(&self, value: &Value) -> CastResult {
        match value {
            Value::Nil => Ok(Bson::Null),
            Value::Model(model) => Ok(Bson::Document(model.to_document())),
            Value::Hash(map) => match self.model_type() {
                Some((_, model_type)) => {
                    let mut model = Model::new(model_type);
                    for (name, item) in map {
                        model
                            .write(name, item.clone())
                            .map_err(|_| TypecastError::new(&self.model, value))?;
                    }
                    Ok(Bson::Document(model.to_document()))
                }
                None => Ok(value.to_bson()),
            },
            other => Err(TypecastError::new(&self.model, other)),
        }
    }

    fn from_store(&self, bson: &Bson) -> Value {
        match (bson, self.model_type()) {
            (Bson::Document(document), Some((registry, model_type))) => {
                Value::from(registry.instantiate(&model_type, document.clone()))
            }
            (other, _) => Value::from_bson(other),
        }
    }
}
