//! Criteria bound to a model type and a mapper.

use bson::{Bson, Document};
use std::sync::Arc;

use crate::{
    backend::StoreBackend,
    error::{MapperError, MapperResult},
    key::ID_FIELD,
    mapper::DocumentMapper,
    model::{Model, ModelType},
    page::{Page, PaginationParams},
    query::{Criteria, Operator, SortDirection},
    value::Value,
};

/// A chainable query over one model type.
///
/// Chaining methods consume and return the query; execution methods borrow it, so a
/// built query can be run several times.
///
/// # Example
///
/// ```ignore
/// let query = mapper
///     .query("Person")?
///     .gt("age", 27)
///     .sort("age", SortDirection::Asc)
///     .limit(1)
///     .skip(1);
///
/// let people = query.all().await?;
/// let total = query.count().await?;
/// ```
pub struct ModelQuery<'a, B: StoreBackend> {
    mapper: &'a DocumentMapper<B>,
    model_type: Arc<ModelType>,
    criteria: Criteria,
}

impl<'a, B: StoreBackend> ModelQuery<'a, B> {
    pub(crate) fn new(mapper: &'a DocumentMapper<B>, model_type: Arc<ModelType>) -> Self {
        Self {
            mapper,
            model_type,
            criteria: Criteria::new(),
        }
    }

    pub fn model_type(&self) -> &Arc<ModelType> {
        &self.model_type
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    fn map(mut self, f: impl FnOnce(Criteria) -> Criteria) -> Self {
        self.criteria = f(self.criteria);
        self
    }

    pub fn filter(self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.map(|c| c.filter(field, op, value))
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.map(|c| c.eq(field, value))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.map(|c| c.ne(field, value))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.map(|c| c.gt(field, value))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.map(|c| c.gte(field, value))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.map(|c| c.lt(field, value))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.map(|c| c.lte(field, value))
    }

    pub fn any_of(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.map(|c| c.any_of(field, values))
    }

    pub fn none_of(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.map(|c| c.none_of(field, values))
    }

    pub fn all_of(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.map(|c| c.all(field, values))
    }

    pub fn field_exists(self, field: impl Into<String>, should_exist: bool) -> Self {
        self.map(|c| c.exists(field, should_exist))
    }

    pub fn or(self, alternatives: impl IntoIterator<Item = Criteria>) -> Self {
        self.map(|c| c.or(alternatives))
    }

    pub fn sort(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.map(|c| c.sort(field, direction))
    }

    pub fn order(self, spec: &str) -> Self {
        self.map(|c| c.order(spec))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.map(|c| c.limit(limit))
    }

    pub fn skip(self, skip: usize) -> Self {
        self.map(|c| c.skip(skip))
    }

    pub fn select<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map(|c| c.select(fields))
    }

    pub fn merge(self, criteria: Criteria) -> Self {
        self.map(|c| c.merge(criteria))
    }

    /// Applies a named scope of the model type.
    pub fn scope(mut self, name: &str) -> MapperResult<Self> {
        self.criteria = self.model_type.scope(name, self.criteria)?;
        Ok(self)
    }

    pub async fn all(&self) -> MapperResult<Vec<Model>> {
        self.mapper
            .find_models(&self.model_type, &self.criteria)
            .await
    }

    pub async fn first(&self) -> MapperResult<Option<Model>> {
        let criteria = self.criteria.clone().limit(1);

        Ok(self
            .mapper
            .find_models(&self.model_type, &criteria)
            .await?
            .into_iter()
            .next())
    }

    /// The last match in sort order (`_id` order when unsorted).
    pub async fn last(&self) -> MapperResult<Option<Model>> {
        let criteria = self.criteria.clone().reversed().limit(1);

        Ok(self
            .mapper
            .find_models(&self.model_type, &criteria)
            .await?
            .into_iter()
            .next())
    }

    pub async fn count(&self) -> MapperResult<u64> {
        self.mapper
            .count_models(&self.model_type, &self.criteria)
            .await
    }

    pub async fn exists(&self) -> MapperResult<bool> {
        let criteria = self.criteria.clone().select([ID_FIELD]).limit(1);

        Ok(!self
            .mapper
            .find_models(&self.model_type, &criteria)
            .await?
            .is_empty())
    }

    /// The match with the given id, if any.
    pub async fn find(&self, id: impl Into<Value>) -> MapperResult<Option<Model>> {
        let criteria = self.criteria.clone().eq(ID_FIELD, id).limit(1);

        Ok(self
            .mapper
            .find_models(&self.model_type, &criteria)
            .await?
            .into_iter()
            .next())
    }

    /// Matches among the given ids, in store order.
    pub async fn find_many<I, V>(&self, ids: I) -> MapperResult<Vec<Model>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids = ids.into_iter().map(Into::into).collect::<Vec<Value>>();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let criteria = self.criteria.clone().any_of(ID_FIELD, ids);
        self.mapper.find_models(&self.model_type, &criteria).await
    }

    /// The match with the given id.
    ///
    /// # Errors
    ///
    /// [`MapperError::DocumentNotFound`] when nothing matches.
    pub async fn get(&self, id: impl Into<Value>) -> MapperResult<Model> {
        let id = id.into();

        self.find(id.clone())
            .await?
            .ok_or_else(|| MapperError::DocumentNotFound {
                id: describe(&id),
                collection: self.collection_name(),
            })
    }

    /// One page of matches, with the total count.
    pub async fn paginate(&self, params: PaginationParams) -> MapperResult<Page<Model>> {
        let count = self.count().await?;

        let criteria = self
            .criteria
            .clone()
            .skip(params.offset())
            .limit(params.per_page);
        let items = self.mapper.find_models(&self.model_type, &criteria).await?;

        Ok(Page::from_parts(items, count as usize, &params))
    }

    /// Removes every match without hooks. Returns how many were removed.
    pub async fn delete_all(&self) -> MapperResult<u64> {
        self.mapper
            .delete_models(&self.model_type, &self.criteria)
            .await
    }

    /// Sets attributes on every match without loading or hooks. Values are coerced
    /// through the declared keys.
    pub async fn update_all<K, V>(
        &self,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> MapperResult<u64>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let keys = self.model_type.keys();
        let mut set = Document::new();

        for (name, value) in attributes {
            let name = name.as_ref();
            let value = value.into();

            match keys.get(name) {
                Some(key) => {
                    set.insert(key.field(), key.set(&value)?);
                }
                None if keys.is_static() => {
                    return Err(MapperError::UndeclaredKey {
                        model: self.model_type.name().to_string(),
                        key: name.to_string(),
                    });
                }
                None => {
                    set.insert(name, value.to_bson());
                }
            }
        }

        if set.is_empty() {
            return Ok(0);
        }

        let mut update = Document::new();
        update.insert("$set", set);

        self.mapper
            .update_models(&self.model_type, &self.criteria, update)
            .await
    }

    pub(crate) fn mapper(&self) -> &'a DocumentMapper<B> {
        self.mapper
    }

    pub(crate) fn collection_name(&self) -> String {
        self.model_type
            .collection()
            .unwrap_or(self.model_type.name())
            .to_string()
    }
}

fn describe(id: &Value) -> String {
    match id.to_bson() {
        Bson::String(s) => s,
        other => other.to_string(),
    }
}
