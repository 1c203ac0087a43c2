use tracing::debug;

use crate::{
    association::{
        Association, ProxyKind,
        proxy::{ProxyState, release},
    },
    backend::StoreBackend,
    error::{MapperError, MapperResult},
    mapper::DocumentMapper,
    model::Model,
    value::Value,
};

/// Proxy of a `belongs_to` or `has_one` association.
///
/// The target is loaded on first access and kept until [`OneProxy::reset`]. The proxy
/// borrows its owner mutably, so link changes are visible on the owner once the proxy
/// is dropped.
///
/// # Example
///
/// ```ignore
/// let mut comment = mapper.query("Comment")?.first().await?.unwrap();
///
/// let mut author = mapper.one(&mut comment, "person")?;
/// if let Some(person) = author.get().await? {
///     println!("{:?}", person.read("name")?);
/// }
/// ```
pub struct OneProxy<'a, B: StoreBackend> {
    mapper: &'a DocumentMapper<B>,
    owner: &'a mut Model,
    association: Association,
    state: ProxyState<Option<Model>>,
}

impl<'a, B: StoreBackend> OneProxy<'a, B> {
    pub(crate) fn new(
        mapper: &'a DocumentMapper<B>,
        owner: &'a mut Model,
        association: Association,
    ) -> MapperResult<Self> {
        if !association.is_singular() {
            return Err(MapperError::InvalidOperation(format!(
                "{}.{} is a has_many association",
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

    /// Forgets the loaded target; the next access queries again.
    pub fn reset(&mut self) {
        self.state = ProxyState::Unloaded;
    }

    pub async fn get(&mut self) -> MapperResult<Option<&Model>> {
        self.load().await?;
        Ok(self.state.loaded().and_then(Option::as_ref))
    }

    pub async fn get_mut(&mut self) -> MapperResult<Option<&mut Model>> {
        self.load().await?;
        Ok(self.state.loaded_mut().and_then(Option::as_mut))
    }

    pub async fn is_present(&mut self) -> MapperResult<bool> {
        Ok(self.get().await?.is_some())
    }

    /// Consumes the proxy and returns the target.
    pub async fn into_target(mut self) -> MapperResult<Option<Model>> {
        self.load().await?;

        Ok(match self.state {
            ProxyState::Loaded(target) => target,
            ProxyState::Unloaded => None,
        })
    }

    async fn load(&mut self) -> MapperResult<()> {
        if !self.state.is_loaded() {
            let target = self.find_target().await?;
            self.state = ProxyState::Loaded(target);
        }

        Ok(())
    }

    async fn find_target(&self) -> MapperResult<Option<Model>> {
        let registry = self.mapper.registry();

        match self.association.kind() {
            ProxyKind::HasOneEmbedded | ProxyKind::HasOneEmbeddedPolymorphic => {
                Ok(self.association.embedded(registry, self.owner)?.into_iter().next())
            }
            kind => {
                // No link stored: nothing to look up.
                let Some(criteria) = self.association.criteria_for(self.owner) else {
                    return Ok(None);
                };

                let target = match kind {
                    ProxyKind::BelongsTo | ProxyKind::BelongsToPolymorphic => {
                        self.association.belongs_to_target(registry, self.owner)?
                    }
                    _ => self.association.target_type()?.clone(),
                };

                debug!(
                    model = %self.owner.type_name(),
                    association = %self.association.name(),
                    target = %target.name(),
                    "loading association target"
                );

                Ok(self
                    .mapper
                    .find_models(&target, &criteria.limit(1))
                    .await?
                    .into_iter()
                    .next())
            }
        }
    }

    /// Assigns a new target, or clears the link with `None`.
    ///
    /// - `belongs_to` saves an unsaved target and writes its id (and type name when
    ///   polymorphic) onto the owner. The owner is not saved.
    /// - `has_one` applies the dependent policy to the previous target, saves a new
    ///   owner, then links and saves the new target.
    /// - embedded variants write the target into the owner document.
    pub async fn replace(&mut self, target: Option<Model>) -> MapperResult<()> {
        match self.association.kind() {
            ProxyKind::BelongsTo | ProxyKind::BelongsToPolymorphic => {
                let mut target = target;

                if let Some(target) = target.as_mut()
                    && target.is_new()
                {
                    self.mapper.save_or_fail(target).await?;
                }

                self.association.assign_belongs_to(self.owner, target.as_ref());
                self.state = ProxyState::Loaded(target);
            }
            ProxyKind::HasOneEmbedded | ProxyKind::HasOneEmbeddedPolymorphic => {
                self.association
                    .store_embedded(self.owner, target.as_slice());
                self.state = ProxyState::Loaded(target);
            }
            _ => {
                if self.association.descriptor().dependent().is_some() {
                    self.load().await?;
                }

                let previous = match &mut self.state {
                    ProxyState::Loaded(previous) => previous.take(),
                    ProxyState::Unloaded => None,
                };

                if let Some(mut previous) = previous
                    && target.as_ref().is_none_or(|t| t.id_bson() != previous.id_bson())
                {
                    let dependent = self.association.descriptor().dependent();
                    release(self.mapper, &self.association, self.owner, &mut previous, dependent)
                        .await?;
                }

                if self.owner.is_new() {
                    self.mapper.save_or_fail(self.owner).await?;
                }

                let mut target = target;
                if let Some(target) = target.as_mut() {
                    self.association.link(self.owner, target);
                    self.mapper.save_or_fail(target).await?;
                }

                self.state = ProxyState::Loaded(target);
            }
        }

        Ok(())
    }

    /// Builds a new target linked to the owner, without saving anything.
    ///
    /// A `belongs_to` owner gets the new target's id; an embedded target is written
    /// into the owner document.
    pub fn build<K, V>(
        &mut self,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> MapperResult<&mut Model>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let target_type = self.association.target_type()?.clone();
        let mut target = Model::with_attributes(target_type, attributes)?;

        match self.association.kind() {
            ProxyKind::BelongsTo | ProxyKind::BelongsToPolymorphic => {
                self.association.assign_belongs_to(self.owner, Some(&target));
            }
            ProxyKind::HasOneEmbedded | ProxyKind::HasOneEmbeddedPolymorphic => {
                self.association
                    .store_embedded(self.owner, std::slice::from_ref(&target));
            }
            _ => self.association.link(self.owner, &mut target),
        }

        self.state = ProxyState::Loaded(Some(target));

        match self.state.loaded_mut() {
            Some(Some(target)) => Ok(target),
            _ => Err(MapperError::InvalidOperation("target was not built".into())),
        }
    }

    /// Builds and saves a new target.
    ///
    /// Embedded targets are saved by saving the owner. A `has_one` target replaces the
    /// previous one, applying the dependent policy.
    pub async fn create<K, V>(
        &mut self,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> MapperResult<Model>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        match self.association.kind() {
            ProxyKind::HasOneEmbedded | ProxyKind::HasOneEmbeddedPolymorphic => {
                let target = self.build(attributes)?.clone();
                self.mapper.save_or_fail(self.owner).await?;
                Ok(target)
            }
            ProxyKind::BelongsTo | ProxyKind::BelongsToPolymorphic => {
                let mut target = self.build(attributes)?.clone();
                self.mapper.save_or_fail(&mut target).await?;
                self.state = ProxyState::Loaded(Some(target.clone()));
                Ok(target)
            }
            _ => {
                let target_type = self.association.target_type()?.clone();
                self.replace(Some(Model::with_attributes(target_type, attributes)?))
                    .await?;

                match self.state.loaded() {
                    Some(Some(target)) => Ok(target.clone()),
                    _ => Err(MapperError::InvalidOperation("target was not created".into())),
                }
            }
        }
    }

    /// Clears the link. For `has_one` the stored target is detached with a direct update.
    pub async fn clear(&mut self) -> MapperResult<()> {
        match self.association.kind() {
            ProxyKind::HasOne | ProxyKind::HasOneAs => {
                if let Some(criteria) = self.association.criteria_for(self.owner)
                    && let Some(update) = self.association.nullify_update(self.owner)
                {
                    let target = self.association.target_type()?.clone();
                    self.mapper.update_models(&target, &criteria, update).await?;
                }

                if let Some(Some(previous)) = self.state.loaded_mut() {
                    self.association.unlink(previous);
                }
                self.state = ProxyState::Loaded(None);
            }
            _ => self.replace(None).await?,
        }

        Ok(())
    }
}
