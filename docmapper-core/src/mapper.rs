//! The persistence boundary.
//!
//! A [`DocumentMapper`] binds a [`StoreBackend`] to a [`ModelRegistry`]. It loads
//! models from documents, persists them with their lifecycle callbacks, destroys them
//! with their dependents, and hands out bound queries and association proxies.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//! use docmapper::memory::InMemoryStore;
//!
//! let mapper = DocumentMapper::builder(InMemoryStore::builder().build().await?)
//!     .registry(registry.clone())
//!     .build();
//!
//! let mut john = mapper.build("Person")?;
//! john.write("name", "John")?;
//! assert!(mapper.save(&mut john).await?);
//!
//! let adults = mapper.query("Person")?.gte("age", 18).all().await?;
//! ```

use bson::{Bson, Document, doc};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::{
    association::{Association, Dependent, ManyProxy, OneProxy},
    backend::{DynStoreBackend, StoreBackend},
    callbacks::{CallbackEvent, Flow},
    error::{MapperError, MapperResult},
    finder::{DynamicFinder, FinderResult},
    key::{ID_FIELD, TYPE_FIELD},
    model::{Model, ModelRegistry, ModelType},
    model_query::ModelQuery,
    query::{Criteria, Query},
    value::Value,
};

/// Options of a single persist call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Run validation hooks and validators before writing.
    pub validate: bool,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

/// Maps model instances to documents of one backend.
#[derive(Debug)]
pub struct DocumentMapper<B: StoreBackend> {
    backend: B,
    registry: Arc<ModelRegistry>,
    validate_on_save: bool,
}

impl<B: StoreBackend> DocumentMapper<B> {
    pub fn new(backend: B, registry: Arc<ModelRegistry>) -> Self {
        Self {
            backend,
            registry,
            validate_on_save: true,
        }
    }

    pub fn builder(backend: B) -> DocumentMapperBuilder<B> {
        DocumentMapperBuilder::new(backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn model_type(&self, name: &str) -> MapperResult<Arc<ModelType>> {
        self.registry.resolve(name)
    }

    /// Creates a new, unsaved instance of the named type.
    pub fn build(&self, model: &str) -> MapperResult<Model> {
        self.registry.build(model)
    }

    /// Wraps a stored document in a model of the named type, or of the type its
    /// `_type` names.
    pub fn load(&self, model: &str, document: Document) -> MapperResult<Model> {
        self.registry.load(model, document)
    }

    /// Builds an instance, writes the attributes and saves it.
    ///
    /// The instance is returned whether or not it passed validation; check
    /// [`Model::is_persisted`] and [`Model::errors`].
    pub async fn create<K, V>(
        &self,
        model: &str,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> MapperResult<Model>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut instance = Model::with_attributes(self.registry.resolve(model)?, attributes)?;
        self.save(&mut instance).await?;

        Ok(instance)
    }

    /// Saves with the mapper's default options.
    pub async fn save(&self, model: &mut Model) -> MapperResult<bool> {
        self.persist(model, SaveOptions::new().validate(self.validate_on_save))
            .await
    }

    /// Inserts a new model or writes the changed fields of a persisted one.
    ///
    /// Returns `Ok(false)` when validation fails or a `before_*` hook halts; nothing is
    /// written in that case.
    ///
    /// # Errors
    ///
    /// [`MapperError::InvalidOperation`] for destroyed or embeddable models; store errors
    /// pass through unchanged.
    pub async fn persist(&self, model: &mut Model, options: SaveOptions) -> MapperResult<bool> {
        if model.is_destroyed() {
            return Err(MapperError::InvalidOperation(format!(
                "cannot save a destroyed {}",
                model.type_name()
            )));
        }

        let model_type = model.model_type().clone();
        let collection = model_type.require_collection()?.to_string();

        if options.validate {
            if model_type.run_callbacks(CallbackEvent::BeforeValidation, model) == Flow::Halt {
                return Ok(false);
            }

            if !model.validate() {
                debug!(
                    model = %model.type_name(),
                    errors = model.errors().len(),
                    "validation failed"
                );
                return Ok(false);
            }
        }

        if model_type.run_callbacks(CallbackEvent::BeforeSave, model) == Flow::Halt {
            return Ok(false);
        }

        if model.is_new() {
            if model_type.run_callbacks(CallbackEvent::BeforeCreate, model) == Flow::Halt {
                return Ok(false);
            }

            debug!(collection = %collection, model = %model.type_name(), "inserting document");
            let id = StoreBackend::insert(&self.backend, &collection, model.to_document()).await?;

            if model.field(ID_FIELD) != Some(&id) {
                model.set_field(ID_FIELD, id);
            }
            model.mark_persisted();
            model_type.run_callbacks(CallbackEvent::AfterCreate, model);
        } else {
            if model_type.run_callbacks(CallbackEvent::BeforeUpdate, model) == Flow::Halt {
                return Ok(false);
            }

            let update = model.attributes().update_document();
            if update.is_empty() {
                trace!(model = %model.type_name(), "no changes to write");
            } else {
                let id = model
                    .attributes()
                    .persisted_id()
                    .cloned()
                    .unwrap_or_else(|| model.id_bson());

                debug!(
                    collection = %collection,
                    model = %model.type_name(),
                    fields = ?model.changed_fields(),
                    "updating document"
                );
                StoreBackend::update_many(&self.backend, &collection, doc! { ID_FIELD: id }, update)
                    .await?;
            }

            model.mark_persisted();
            model_type.run_callbacks(CallbackEvent::AfterUpdate, model);
        }

        model_type.run_callbacks(CallbackEvent::AfterSave, model);

        Ok(true)
    }

    /// Saves, turning a refused save into an error. Used where a proxy must persist a
    /// side of a link to stay consistent.
    pub(crate) async fn save_or_fail(&self, model: &mut Model) -> MapperResult<()> {
        if self.save(model).await? {
            return Ok(());
        }

        let reason = if model.errors().is_empty() {
            "halted by a callback".to_string()
        } else {
            model.errors().full_messages().join(", ")
        };

        Err(MapperError::InvalidOperation(format!(
            "{} was not saved: {reason}",
            model.type_name()
        )))
    }

    /// Removes the model's document, running destroy hooks and applying the dependent
    /// policy of each association afterwards.
    ///
    /// Returns `Ok(false)` when a `before_destroy` hook halts.
    pub async fn destroy(&self, model: &mut Model) -> MapperResult<bool> {
        self.destroy_boxed(model).await
    }

    fn destroy_boxed<'a>(&'a self, model: &'a mut Model) -> BoxFuture<'a, MapperResult<bool>> {
        async move {
            let model_type = model.model_type().clone();
            let collection = model_type.require_collection()?.to_string();

            if model_type.run_callbacks(CallbackEvent::BeforeDestroy, model) == Flow::Halt {
                return Ok(false);
            }

            if !model.is_new() {
                debug!(collection = %collection, model = %model.type_name(), "destroying document");
                StoreBackend::delete_many(
                    &self.backend,
                    &collection,
                    doc! { ID_FIELD: model.id_bson() },
                )
                .await?;

                self.destroy_dependents(model).await?;
            }

            model.mark_destroyed();
            model_type.run_callbacks(CallbackEvent::AfterDestroy, model);

            Ok(true)
        }
        .boxed()
    }

    async fn destroy_dependents(&self, owner: &Model) -> MapperResult<()> {
        for descriptor in owner.model_type().associations() {
            let Some(dependent) = descriptor.dependent() else {
                continue;
            };

            let association = Association::from_descriptor(&self.registry, descriptor.clone())?;
            if association.kind().is_embedded() {
                continue;
            }

            let Some(criteria) = association.criteria_for(owner) else {
                continue;
            };
            let target = association.target_type()?.clone();
            let collection = target.require_collection()?.to_string();

            debug!(
                model = %owner.type_name(),
                association = %association.name(),
                dependent = ?dependent,
                "cleaning up dependents"
            );

            match dependent {
                Dependent::Destroy => {
                    for mut related in self.find_models(&target, &criteria).await? {
                        self.destroy_boxed(&mut related).await?;
                    }
                }
                Dependent::Delete | Dependent::DeleteAll => {
                    let query = self.render(&target, &criteria)?;
                    StoreBackend::delete_many(&self.backend, &collection, query.filter).await?;
                }
                Dependent::Nullify => {
                    if let Some(update) = association.nullify_update(owner) {
                        let query = self.render(&target, &criteria)?;
                        StoreBackend::update_many(&self.backend, &collection, query.filter, update)
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Removes the model's document without hooks or dependents.
    pub async fn delete(&self, model: &mut Model) -> MapperResult<()> {
        let collection = model.model_type().require_collection()?.to_string();

        if !model.is_new() {
            debug!(collection = %collection, model = %model.type_name(), "deleting document");
            StoreBackend::delete_many(&self.backend, &collection, doc! { ID_FIELD: model.id_bson() })
                .await?;
        }

        model.mark_destroyed();

        Ok(())
    }

    /// Replaces the model's attributes with the stored document.
    ///
    /// # Errors
    ///
    /// [`MapperError::DocumentNotFound`] if the document no longer exists.
    pub async fn reload(&self, model: &mut Model) -> MapperResult<()> {
        let model_type = model.model_type().clone();
        let collection = model_type.require_collection()?;
        let id = model.id_bson();

        let query = Query {
            limit: Some(1),
            ..Query::filter(doc! { ID_FIELD: id.clone() })
        };
        let document = StoreBackend::find(&self.backend, collection, query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MapperError::DocumentNotFound {
                id: id.to_string(),
                collection: collection.to_string(),
            })?;

        *model = Model::load(model_type, document);

        Ok(())
    }

    /// A query bound to the named model type.
    pub fn query(&self, model: &str) -> MapperResult<ModelQuery<'_, B>> {
        Ok(ModelQuery::new(self, self.registry.resolve(model)?))
    }

    /// Runs a dynamic finder such as `find_by_name_and_age` against the named type.
    pub async fn find_dynamic(
        &self,
        model: &str,
        method: &str,
        arguments: Vec<Value>,
    ) -> MapperResult<FinderResult> {
        let finder = DynamicFinder::parse(method)?;
        self.query(model)?.dispatch(&finder, arguments).await
    }

    /// Proxy of a `belongs_to` or `has_one` association of `owner`.
    pub fn one<'a>(&'a self, owner: &'a mut Model, name: &str) -> MapperResult<OneProxy<'a, B>> {
        let association = Association::resolve(&self.registry, owner.model_type(), name)?;
        OneProxy::new(self, owner, association)
    }

    /// Proxy of a `has_many` association of `owner`.
    pub fn many<'a>(&'a self, owner: &'a mut Model, name: &str) -> MapperResult<ManyProxy<'a, B>> {
        let association = Association::resolve(&self.registry, owner.model_type(), name)?;
        ManyProxy::new(self, owner, association)
    }

    /// Renders criteria for a model type, rejecting operators the backend cannot
    /// evaluate and restricting subtypes to their own documents.
    pub(crate) fn render(&self, model_type: &ModelType, criteria: &Criteria) -> MapperResult<Query> {
        if let Some(op) = criteria
            .operators()
            .into_iter()
            .find(|op| !StoreBackend::supports_operator(&self.backend, *op))
        {
            return Err(MapperError::Query(format!(
                "operator {op} is not supported by the backend"
            )));
        }

        let criteria = match self.type_scope(model_type) {
            Some(types) if !criteria.conditions().iter().any(|c| c.field == TYPE_FIELD) => {
                criteria.clone().any_of(TYPE_FIELD, types)
            }
            _ => criteria.clone(),
        };

        criteria.render(Some(model_type.keys()))
    }

    /// Type names a subtype query is restricted to.
    fn type_scope(&self, model_type: &ModelType) -> Option<Vec<Value>> {
        model_type.parent()?;

        let mut names = vec![Value::from(model_type.name())];
        names.extend(
            self.registry
                .descendants(model_type.name())
                .into_iter()
                .map(Value::from),
        );

        Some(names)
    }

    pub(crate) async fn find_models(
        &self,
        model_type: &Arc<ModelType>,
        criteria: &Criteria,
    ) -> MapperResult<Vec<Model>> {
        let collection = model_type.require_collection()?;
        let query = self.render(model_type, criteria)?;

        debug!(
            collection = %collection,
            model = %model_type.name(),
            filter = %query.filter,
            "finding documents"
        );

        Ok(StoreBackend::find(&self.backend, collection, query)
            .await?
            .into_iter()
            .map(|document| self.registry.instantiate(model_type, document))
            .collect())
    }

    pub(crate) async fn count_models(
        &self,
        model_type: &ModelType,
        criteria: &Criteria,
    ) -> MapperResult<u64> {
        let collection = model_type.require_collection()?;
        let query = self.render(model_type, criteria)?;

        debug!(collection = %collection, filter = %query.filter, "counting documents");

        Ok(StoreBackend::count(&self.backend, collection, query.filter).await?)
    }

    pub(crate) async fn delete_models(
        &self,
        model_type: &ModelType,
        criteria: &Criteria,
    ) -> MapperResult<u64> {
        let collection = model_type.require_collection()?;
        let query = self.render(model_type, criteria)?;

        debug!(collection = %collection, filter = %query.filter, "deleting documents");

        Ok(StoreBackend::delete_many(&self.backend, collection, query.filter).await?)
    }

    pub(crate) async fn update_models(
        &self,
        model_type: &ModelType,
        criteria: &Criteria,
        update: Document,
    ) -> MapperResult<u64> {
        let collection = model_type.require_collection()?;
        let query = self.render(model_type, criteria)?;

        debug!(collection = %collection, filter = %query.filter, "updating documents");

        Ok(StoreBackend::update_many(&self.backend, collection, query.filter, update).await?)
    }

    /// Applies update operators to a single stored model.
    pub(crate) async fn update_one(&self, model: &Model, update: Document) -> MapperResult<u64> {
        let collection = model.model_type().require_collection()?;
        let filter = doc! { ID_FIELD: model.attributes().persisted_id().cloned().unwrap_or(Bson::Null) };

        debug!(collection = %collection, model = %model.type_name(), "updating document");

        Ok(StoreBackend::update_many(&self.backend, collection, filter, update).await?)
    }

    /// Shuts the backend down.
    pub async fn shutdown(self) -> MapperResult<()> {
        Ok(StoreBackend::shutdown(self.backend).await?)
    }
}

impl<B: StoreBackend + 'static> DocumentMapper<B> {
    /// Erases the backend type, for choosing a backend at runtime.
    pub fn into_dyn(self) -> DocumentMapper<Box<dyn DynStoreBackend>> {
        DocumentMapper {
            backend: Box::new(self.backend),
            registry: self.registry,
            validate_on_save: self.validate_on_save,
        }
    }
}

pub struct DocumentMapperBuilder<B: StoreBackend> {
    backend: B,
    registry: Option<Arc<ModelRegistry>>,
    validate_on_save: bool,
}

impl<B: StoreBackend> DocumentMapperBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registry: None,
            validate_on_save: true,
        }
    }

    /// Uses a shared registry. Without one the mapper gets an empty registry of its own.
    pub fn registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Whether [`DocumentMapper::save`] validates. Defaults to `true`.
    pub fn validate_on_save(mut self, validate: bool) -> Self {
        self.validate_on_save = validate;
        self
    }

    pub fn build(self) -> DocumentMapper<B> {
        DocumentMapper {
            backend: self.backend,
            registry: self.registry.unwrap_or_else(ModelRegistry::new),
            validate_on_save: self.validate_on_save,
        }
    }
}
