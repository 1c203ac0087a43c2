use bson::Bson;
use tracing::debug;

use crate::{
    association::{
        Association, Dependent, ProxyKind,
        proxy::{ProxyState, release},
    },
    backend::StoreBackend,
    error::{MapperError, MapperResult},
    key::ID_FIELD,
    mapper::DocumentMapper,
    model::Model,
    page::{Page, PaginationParams},
    query::Criteria,
    value::Value,
};

/// Proxy of a `has_many` association.
///
/// Members are loaded as a whole on first access and kept in order until
/// [`ManyProxy::reset`]. Counting does not load: it asks the store, reads the owner's id
/// list, or counts embedded documents.
///
/// # Example
///
/// ```ignore
/// let mut comments = mapper.many(&mut post, "comments")?;
///
/// comments.create([("body", "First!")]).await?;
/// assert_eq!(comments.count().await?, 1);
///
/// for comment in comments.iter().await? {
///     println!("{:?}", comment.read("body")?);
/// }
/// ```
pub struct ManyProxy<'a, B: StoreBackend> {
    mapper: &'a DocumentMapper<B>,
    owner: &'a mut Model,
    association: Association,
    state: ProxyState<Vec<Model>>,
}

impl<'a, B: StoreBackend> ManyProxy<'a, B> {
    pub(crate) fn new(
        mapper: &'a DocumentMapper<B>,
        owner: &'a mut Model,
        association: Association,
    ) -> MapperResult<Self> {
        if association.is_singular() {
            return Err(MapperError::InvalidOperation(format!(
                "{}.{} is not a has_many association",
                owner.type_name(),
                association.name()
            )));
        }

        Ok(Self {
            mapper,
            owner,
            association,
            state: ProxyState::Unloaded,
        })
    }

    pub fn kind(&self) -> ProxyKind {
        self.association.kind()
    }

    pub fn association(&self) -> &Association {
        &self.association
    }

    pub fn owner(&self) -> &Model {
        self.owner
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    pub fn reset(&mut self) {
        self.state = ProxyState::Unloaded;
    }

    fn is_embedded(&self) -> bool {
        self.association.kind().is_embedded()
    }

    async fn load(&mut self) -> MapperResult<&mut Vec<Model>> {
        if !self.state.is_loaded() {
            let members = self.find_target(Criteria::new()).await?;
            self.state = ProxyState::Loaded(members);
        }

        match self.state.loaded_mut() {
            Some(members) => Ok(members),
            None => Err(MapperError::InvalidOperation("association is not loaded".into())),
        }
    }

    /// Stored members matching `extra` on top of the association's own conditions.
    async fn find_target(&self, extra: Criteria) -> MapperResult<Vec<Model>> {
        if self.is_embedded() {
            return self.association.embedded(self.mapper.registry(), self.owner);
        }

        let Some(criteria) = self.association.criteria_for(self.owner) else {
            return Ok(Vec::new());
        };
        let target = self.association.target_type()?;

        debug!(
            model = %self.owner.type_name(),
            association = %self.association.name(),
            target = %target.name(),
            "loading association members"
        );

        self.mapper
            .find_models(target, &criteria.merge(extra))
            .await
    }

    /// Every member, in store order.
    pub async fn all(&mut self) -> MapperResult<&[Model]> {
        Ok(self.load().await?.as_slice())
    }

    pub async fn iter(&mut self) -> MapperResult<std::slice::Iter<'_, Model>> {
        Ok(self.load().await?.iter())
    }

    pub async fn get(&mut self, index: usize) -> MapperResult<Option<&Model>> {
        Ok(self.load().await?.get(index).map(|member| &*member))
    }

    /// Number of loaded members. Loads the association.
    pub async fn len(&mut self) -> MapperResult<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&mut self) -> MapperResult<bool> {
        Ok(self.count().await? == 0)
    }

    pub async fn is_present(&mut self) -> MapperResult<bool> {
        Ok(!self.is_empty().await?)
    }

    /// Number of members, without loading them.
    ///
    /// An id-list association without static conditions answers from the owner's list,
    /// embedded associations from the owner document.
    pub async fn count(&mut self) -> MapperResult<u64> {
        match self.association.kind() {
            kind if kind.is_embedded() => Ok(self.load().await?.len() as u64),
            ProxyKind::HasManyInArray
                if !self.association.descriptor().options().query.has_conditions() =>
            {
                Ok(self.association.id_list(self.owner).len() as u64)
            }
            _ => {
                let Some(criteria) = self.association.criteria_for(self.owner) else {
                    return Ok(0);
                };
                let target = self.association.target_type()?;
                self.mapper.count_models(target, &criteria).await
            }
        }
    }

    /// The member with the given id.
    pub async fn find(&mut self, id: impl Into<Value>) -> MapperResult<Option<Model>> {
        let id = id.into();

        if self.is_embedded() {
            let id = match self.association.target_type()?.keys().get(ID_FIELD) {
                Some(key) => key.cast_query_value(&id, false),
                None => id.to_bson(),
            };
            return Ok(self
                .load()
                .await?
                .iter()
                .find(|member| member.id_bson() == id)
                .cloned());
        }

        Ok(self
            .find_target(Criteria::new().eq(ID_FIELD, id).limit(1))
            .await?
            .into_iter()
            .next())
    }

    /// Members matching additional criteria. Does not change the loaded state.
    pub async fn matching(&mut self, criteria: Criteria) -> MapperResult<Vec<Model>> {
        if self.is_embedded() {
            return Err(MapperError::InvalidOperation(format!(
                "{} is embedded and cannot be queried",
                self.association.name()
            )));
        }

        self.find_target(criteria).await
    }

    /// One page of members.
    pub async fn paginate(&mut self, params: PaginationParams) -> MapperResult<Page<Model>> {
        if self.is_embedded() {
            return Ok(params.paginate(self.load().await?.clone()));
        }

        let count = self.count().await?;
        let items = self
            .find_target(Criteria::new().skip(params.offset()).limit(params.per_page))
            .await?;

        Ok(Page::from_parts(items, count as usize, &params))
    }

    /// Links a model to the owner and persists the link.
    ///
    /// Foreign-keyed variants save a new owner first, then the linked target. Id-list
    /// variants save a new target and add its id to the owner's list; the owner is saved
    /// by the caller. Foreign-array variants add the owner id to the target's list and
    /// save both sides. Embedded variants write the target into the owner document.
    pub async fn push(&mut self, mut target: Model) -> MapperResult<()> {
        self.attach(&mut target).await?;
        self.remember(target);

        Ok(())
    }

    pub async fn extend(&mut self, targets: impl IntoIterator<Item = Model>) -> MapperResult<()> {
        for target in targets {
            self.push(target).await?;
        }

        Ok(())
    }

    async fn attach(&mut self, target: &mut Model) -> MapperResult<()> {
        match self.association.kind() {
            kind if kind.is_embedded() => {
                let mut members = self.load().await?.clone();
                members.retain(|member| member.id_bson() != target.id_bson());
                members.push(target.clone());
                self.association.store_embedded(self.owner, &members);
            }
            ProxyKind::HasManyInArray => {
                if target.is_new() {
                    self.mapper.save_or_fail(target).await?;
                }
                self.association.add_id(self.owner, target.id_bson());
            }
            ProxyKind::HasManyInForeignArray => {
                if self.owner.is_new() {
                    self.mapper.save_or_fail(self.owner).await?;
                }

                let inverse = self.association.inverse(self.mapper.registry())?;
                inverse.add_id(target, self.owner.id_bson());
                self.mapper.save_or_fail(target).await?;

                if self.owner.is_changed() {
                    self.mapper.save_or_fail(self.owner).await?;
                }
            }
            _ => {
                if self.owner.is_new() {
                    self.mapper.save_or_fail(self.owner).await?;
                }

                self.association.link(self.owner, target);
                self.mapper.save_or_fail(target).await?;
            }
        }

        Ok(())
    }

    /// Adds a member to the loaded list, if the list is loaded.
    fn remember(&mut self, target: Model) {
        if let Some(members) = self.state.loaded_mut() {
            match members
                .iter_mut()
                .find(|member| member.id_bson() == target.id_bson())
            {
                Some(existing) => *existing = target,
                None => members.push(target),
            }
        }
    }

    /// Replaces the members.
    ///
    /// Members that are not in the new set are released by the dependent policy, or
    /// detached when none is declared. Embedded and id-list variants only rewrite the
    /// owner.
    pub async fn replace(&mut self, targets: Vec<Model>) -> MapperResult<()> {
        let keep = targets.iter().map(Model::id_bson).collect::<Vec<_>>();

        match self.association.kind() {
            kind if kind.is_embedded() => {
                self.association.store_embedded(self.owner, &targets);
                self.state = ProxyState::Loaded(targets);
                return Ok(());
            }
            ProxyKind::HasManyInArray => {
                self.association.set_id_list(self.owner, Vec::new());
            }
            ProxyKind::HasManyInForeignArray => {
                let inverse = self.association.inverse(self.mapper.registry())?;
                let owner_id = self.owner.id_bson();

                for mut previous in self.load().await?.clone() {
                    if !keep.contains(&previous.id_bson()) && inverse.remove_id(&mut previous, &owner_id) {
                        self.mapper.save_or_fail(&mut previous).await?;
                    }
                }
            }
            _ => {
                let dependent = self
                    .association
                    .descriptor()
                    .dependent()
                    .or(Some(Dependent::Nullify));

                for mut previous in self.load().await?.clone() {
                    if !keep.contains(&previous.id_bson()) {
                        release(self.mapper, &self.association, self.owner, &mut previous, dependent)
                            .await?;
                    }
                }
            }
        }

        self.state = ProxyState::Loaded(Vec::new());
        self.extend(targets).await
    }

    /// Builds a new member linked to the owner, without saving it.
    ///
    /// Embedded members are written into the owner document and id-list members are
    /// added to the owner's list.
    pub async fn build<K, V>(
        &mut self,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> MapperResult<Model>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let target_type = self.association.target_type()?.clone();
        let mut target = Model::with_attributes(target_type, attributes)?;

        match self.association.kind() {
            kind if kind.is_embedded() => {
                self.attach(&mut target).await?;
            }
            ProxyKind::HasManyInArray => {
                self.association.add_id(self.owner, target.id_bson());
            }
            ProxyKind::HasManyInForeignArray => {
                let inverse = self.association.inverse(self.mapper.registry())?;
                inverse.add_id(&mut target, self.owner.id_bson());
            }
            _ => self.association.link(self.owner, &mut target),
        }

        self.remember(target.clone());

        Ok(target)
    }

    /// Builds a member and persists it with its link.
    ///
    /// Embedded members are saved by saving the owner.
    pub async fn create<K, V>(
        &mut self,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> MapperResult<Model>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut target = self.build(attributes).await?;

        if self.is_embedded() {
            self.mapper.save_or_fail(self.owner).await?;
        } else {
            self.attach(&mut target).await?;
            self.remember(target.clone());
        }

        Ok(target)
    }

    /// Removes every member document directly, without hooks.
    pub async fn delete_all(&mut self) -> MapperResult<u64> {
        let removed = match self.association.kind() {
            kind if kind.is_embedded() => {
                let removed = self.count().await?;
                self.association.store_embedded(self.owner, &[]);
                removed
            }
            kind => {
                let removed = match self.association.criteria_for(self.owner) {
                    Some(criteria) => {
                        let target = self.association.target_type()?;
                        self.mapper.delete_models(target, &criteria).await?
                    }
                    None => 0,
                };

                if kind == ProxyKind::HasManyInArray {
                    self.association.set_id_list(self.owner, Vec::new());
                }

                removed
            }
        };

        self.state = ProxyState::Loaded(Vec::new());

        Ok(removed)
    }

    /// Destroys every member, running its hooks and dependents.
    pub async fn destroy_all(&mut self) -> MapperResult<u64> {
        if self.is_embedded() {
            return self.delete_all().await;
        }

        let members = std::mem::take(self.load().await?);
        let mut destroyed = 0;

        for mut member in members {
            if self.mapper.destroy(&mut member).await? {
                destroyed += 1;
            }
        }

        if self.association.kind() == ProxyKind::HasManyInArray {
            self.association.set_id_list(self.owner, Vec::new());
        }

        self.state = ProxyState::Loaded(Vec::new());

        Ok(destroyed)
    }

    /// Detaches every member without removing it.
    ///
    /// Returns the number of stored documents updated; id-list and embedded variants
    /// only rewrite the owner and report the members dropped from it.
    pub async fn nullify(&mut self) -> MapperResult<u64> {
        let detached = match self.association.kind() {
            kind if kind.is_embedded() => return self.delete_all().await,
            ProxyKind::HasManyInArray => {
                let detached = self.association.id_list(self.owner).len() as u64;
                self.association.set_id_list(self.owner, Vec::new());
                detached
            }
            _ => match (
                self.association.criteria_for(self.owner),
                self.association.nullify_update(self.owner),
            ) {
                (Some(criteria), Some(update)) => {
                    let target = self.association.target_type()?;
                    self.mapper.update_models(target, &criteria, update).await?
                }
                _ => 0,
            },
        };

        self.state = ProxyState::Loaded(Vec::new());

        Ok(detached)
    }

    /// Detaches one member without removing it.
    pub async fn remove(&mut self, target: &mut Model) -> MapperResult<()> {
        let id = target.id_bson();

        match self.association.kind() {
            kind if kind.is_embedded() => {
                let mut members = self.load().await?.clone();
                members.retain(|member| member.id_bson() != id);
                self.association.store_embedded(self.owner, &members);
            }
            ProxyKind::HasManyInArray => {
                self.association.remove_id(self.owner, &id);
            }
            ProxyKind::HasManyInForeignArray => {
                let inverse = self.association.inverse(self.mapper.registry())?;
                let owner_id = self.owner.id_bson();

                if inverse.remove_id(target, &owner_id) && !target.is_new() {
                    self.mapper.save_or_fail(target).await?;
                }
            }
            _ => {
                release(
                    self.mapper,
                    &self.association,
                    self.owner,
                    target,
                    Some(Dependent::Nullify),
                )
                .await?;
            }
        }

        if let Some(members) = self.state.loaded_mut() {
            members.retain(|member| member.id_bson() != id);
        }

        Ok(())
    }

    /// Ids of the members in the owner's id list.
    pub fn ids(&self) -> Vec<Bson> {
        match self.association.kind() {
            ProxyKind::HasManyInArray => self.association.id_list(self.owner),
            _ => self
                .state
                .loaded()
                .map(|members| members.iter().map(Model::id_bson).collect())
                .unwrap_or_default(),
        }
    }
}
