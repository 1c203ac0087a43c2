use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    association::{AssociationDescriptor, AssociationKind, AssociationOptions},
    callbacks::{CallbackEvent, Callbacks, Errors, Flow},
    error::{MapperError, MapperResult},
    key::{KeyDefinition, KeySet},
    model::Model,
    query::Criteria,
};

pub type Scope = Arc<dyn Fn(Criteria) -> Criteria + Send + Sync>;

/// A registered model type: keys, associations, hooks and scopes.
///
/// Model types are created through [`ModelType::builder`] and registered with
/// [`ModelRegistry::define`](crate::model::ModelRegistry::define), which resolves the
/// key types. They are immutable afterwards.
#[derive(Clone)]
pub struct ModelType {
    pub(crate) name: String,
    pub(crate) collection: Option<String>,
    pub(crate) embeddable: bool,
    pub(crate) parent: Option<String>,
    pub(crate) keys: Arc<KeySet>,
    pub(crate) definitions: Vec<KeyDefinition>,
    pub(crate) associations: Vec<Arc<AssociationDescriptor>>,
    pub(crate) callbacks: Callbacks,
    pub(crate) scopes: HashMap<String, Scope>,
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("embeddable", &self.embeddable)
            .field("parent", &self.parent)
            .field("keys", &self.keys.iter().map(|k| k.name()).collect::<Vec<_>>())
            .field(
                "associations",
                &self.associations.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ModelType {
    pub fn builder(name: impl Into<String>) -> ModelTypeBuilder {
        ModelTypeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection the documents are stored in. `None` for embeddable types.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub(crate) fn require_collection(&self) -> MapperResult<&str> {
        self.collection.as_deref().ok_or_else(|| {
            MapperError::InvalidOperation(format!(
                "{} is embeddable and has no collection of its own",
                self.name
            ))
        })
    }

    pub fn is_embeddable(&self) -> bool {
        self.embeddable
    }

    /// Type this one inherits keys, associations and collection from.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub(crate) fn key_set(&self) -> Arc<KeySet> {
        self.keys.clone()
    }

    pub fn key_definitions(&self) -> &[KeyDefinition] {
        &self.definitions
    }

    pub fn associations(&self) -> &[Arc<AssociationDescriptor>] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> MapperResult<&Arc<AssociationDescriptor>> {
        self.associations
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| MapperError::UnknownAssociation {
                model: self.name.clone(),
                association: name.to_string(),
            })
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub(crate) fn run_callbacks(&self, event: CallbackEvent, model: &mut Model) -> Flow {
        self.callbacks.run(event, model)
    }

    pub(crate) fn validate_model(&self, model: &Model) -> Errors {
        let mut errors = self.callbacks.validate_model(model);
        crate::callbacks::validate_required(model, &mut errors);
        errors
    }

    /// Applies a named scope to a criteria.
    pub fn scope(&self, name: &str, criteria: Criteria) -> MapperResult<Criteria> {
        self.scopes
            .get(name)
            .map(|scope| scope(criteria))
            .ok_or_else(|| MapperError::Query(format!("unknown scope {name} on {}", self.name)))
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }
}

/// Declaration of a model type.
///
/// # Example
///
/// ```ignore
/// let person = ModelType::builder("Person")
///     .key(KeyDefinition::new("name", TypeTag::String).required())
///     .key(KeyDefinition::new("age", TypeTag::Integer))
///     .has_many("comments", AssociationOptions::new().dependent(Dependent::Nullify))
///     .scope("adults", |c| c.gte("age", 18));
///
/// registry.define(person)?;
/// ```
pub struct ModelTypeBuilder {
    pub(crate) name: String,
    pub(crate) collection: Option<String>,
    pub(crate) embeddable: bool,
    pub(crate) dynamic_keys: bool,
    pub(crate) parent: Option<String>,
    pub(crate) keys: Vec<KeyDefinition>,
    pub(crate) associations: Vec<(AssociationKind, String, AssociationOptions)>,
    pub(crate) callbacks: Callbacks,
    pub(crate) scopes: HashMap<String, Scope>,
}

impl ModelTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            embeddable: false,
            dynamic_keys: false,
            parent: None,
            keys: Vec::new(),
            associations: Vec::new(),
            callbacks: Callbacks::new(),
            scopes: HashMap::new(),
        }
    }

    /// Overrides the default collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Instances live inside other documents and have no collection.
    pub fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }

    /// Accept reads and writes of undeclared names.
    pub fn dynamic_keys(mut self) -> Self {
        self.dynamic_keys = true;
        self
    }

    /// Inherits keys, associations, hooks and the collection of a registered type.
    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn key(mut self, definition: KeyDefinition) -> Self {
        self.keys.push(definition);
        self
    }

    pub fn belongs_to(mut self, name: impl Into<String>, options: AssociationOptions) -> Self {
        self.associations
            .push((AssociationKind::BelongsTo, name.into(), options));
        self
    }

    pub fn has_one(mut self, name: impl Into<String>, options: AssociationOptions) -> Self {
        self.associations
            .push((AssociationKind::HasOne, name.into(), options));
        self
    }

    pub fn has_many(mut self, name: impl Into<String>, options: AssociationOptions) -> Self {
        self.associations
            .push((AssociationKind::HasMany, name.into(), options));
        self
    }

    pub fn on<F>(mut self, event: CallbackEvent, hook: F) -> Self
    where
        F: Fn(&mut Model) -> Flow + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.on(event, hook);
        self
    }

    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Model, &mut Errors) + Send + Sync + 'static,
    {
        self.callbacks = self.callbacks.validate(validator);
        self
    }

    pub fn scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(Criteria) -> Criteria + Send + Sync + 'static,
    {
        self.scopes.insert(name.into(), Arc::new(scope));
        self
    }
}
