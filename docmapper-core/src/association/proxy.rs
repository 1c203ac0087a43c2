//! Resolution of an association for one owner, shared by the one and many proxies and
//! by dependent cleanup.

use bson::{Bson, Document, doc};
use std::sync::Arc;

use crate::{
    association::{AssociationDescriptor, AssociationKind, Dependent, ProxyKind},
    backend::StoreBackend,
    error::{MapperError, MapperResult},
    key::{ID_FIELD, TYPE_FIELD},
    mapper::DocumentMapper,
    model::{Model, ModelRegistry, ModelType},
    query::Criteria,
    value::Value,
};

/// Load state of a proxy target.
#[derive(Debug, Clone, Default)]
pub(crate) enum ProxyState<T> {
    #[default]
    Unloaded,
    Loaded(T),
}

impl<T> ProxyState<T> {
    pub(crate) fn is_loaded(&self) -> bool {
        matches!(self, ProxyState::Loaded(_))
    }

    pub(crate) fn loaded(&self) -> Option<&T> {
        match self {
            ProxyState::Loaded(target) => Some(target),
            ProxyState::Unloaded => None,
        }
    }

    pub(crate) fn loaded_mut(&mut self) -> Option<&mut T> {
        match self {
            ProxyState::Loaded(target) => Some(target),
            ProxyState::Unloaded => None,
        }
    }
}

/// An association descriptor with its proxy variant and target type resolved.
#[derive(Debug, Clone)]
pub struct Association {
    descriptor: Arc<AssociationDescriptor>,
    kind: ProxyKind,
    /// `None` only for a polymorphic `belongs_to` whose declared target is not a
    /// registered type; the stored discriminator names the type instead.
    target: Option<Arc<ModelType>>,
}

impl Association {
    /// Resolves the named association of `owner` against the registry.
    ///
    /// # Errors
    ///
    /// [`MapperError::UnknownAssociation`] if the owner type declares no such association,
    /// [`MapperError::AssociationConfiguration`] if the target type is unknown or the
    /// options conflict with its embeddability.
    pub fn resolve(
        registry: &ModelRegistry,
        owner: &ModelType,
        name: &str,
    ) -> MapperResult<Self> {
        Self::from_descriptor(registry, owner.association(name)?.clone())
    }

    pub fn from_descriptor(
        registry: &ModelRegistry,
        descriptor: Arc<AssociationDescriptor>,
    ) -> MapperResult<Self> {
        let target = registry.get(descriptor.target());

        let kind = match (&target, descriptor.kind()) {
            (Some(target), _) => descriptor.proxy_kind(target.is_embeddable())?,
            (None, AssociationKind::BelongsTo) if descriptor.options().polymorphic => {
                ProxyKind::BelongsToPolymorphic
            }
            (None, _) => {
                return Err(MapperError::AssociationConfiguration {
                    model: descriptor.owner().to_string(),
                    association: descriptor.name().to_string(),
                    reason: format!("unknown target type {}", descriptor.target()),
                });
            }
        };

        Ok(Self {
            descriptor,
            kind,
            target,
        })
    }

    pub fn descriptor(&self) -> &AssociationDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// Whether the proxy holds at most one target.
    pub fn is_singular(&self) -> bool {
        self.descriptor.kind() != AssociationKind::HasMany
    }

    /// The declared target type.
    pub fn target_type(&self) -> MapperResult<&Arc<ModelType>> {
        self.target
            .as_ref()
            .ok_or_else(|| MapperError::UnknownModel(self.descriptor.target().to_string()))
    }

    /// Concrete target type of a `belongs_to`: the type named by the stored discriminator
    /// of a polymorphic link, the declared target when none is stored.
    ///
    /// # Errors
    ///
    /// [`MapperError::UnknownModel`] if the discriminator names an unregistered type.
    pub(crate) fn belongs_to_target(
        &self,
        registry: &ModelRegistry,
        owner: &Model,
    ) -> MapperResult<Arc<ModelType>> {
        if let Some(type_field) = self.descriptor.type_field()
            && let Some(Bson::String(name)) = owner.field(&self.owner_field(owner, &type_field))
        {
            return registry.resolve(name);
        }

        self.target_type().cloned()
    }

    /// Foreign key stored on the owner of a `belongs_to`; `None` when unset.
    pub(crate) fn stored_foreign_id(&self, owner: &Model) -> Option<Bson> {
        owner
            .field(&self.owner_field(owner, &self.descriptor.foreign_key()))
            .filter(|id| !matches!(id, Bson::Null))
            .cloned()
    }

    /// Physical name of an owner key.
    fn owner_field(&self, owner: &Model, name: &str) -> String {
        owner.model_type().keys().physical_name(name).to_string()
    }

    /// Physical name of a target key.
    fn target_field(&self, name: &str) -> String {
        match &self.target {
            Some(target) => target.keys().physical_name(name).to_string(),
            None => name.to_string(),
        }
    }

    /// Points the owner's `belongs_to` link at `target`, or clears it.
    pub(crate) fn assign_belongs_to(&self, owner: &mut Model, target: Option<&Model>) {
        let foreign_key = self.owner_field(owner, &self.descriptor.foreign_key());
        let type_field = self
            .descriptor
            .type_field()
            .map(|field| self.owner_field(owner, &field));

        match target {
            Some(target) => {
                owner.set_field(&foreign_key, target.id_bson());
                if let Some(type_field) = type_field {
                    owner.set_field(&type_field, Bson::String(target.type_name().to_string()));
                }
            }
            None => {
                owner.unset_field(&foreign_key);
                if let Some(type_field) = type_field {
                    owner.unset_field(&type_field);
                }
            }
        }
    }

    /// Writes the link to `owner` onto a foreign-keyed target.
    pub(crate) fn link(&self, owner: &Model, target: &mut Model) {
        if !self.kind.is_foreign_keyed() {
            return;
        }

        target.set_field(&self.target_field(&self.descriptor.foreign_key()), owner.id_bson());

        if let Some(type_field) = self.descriptor.type_field()
            && type_field != TYPE_FIELD
        {
            target.set_field(
                &self.target_field(&type_field),
                Bson::String(owner.type_name().to_string()),
            );
        }
    }

    /// Clears the link on a foreign-keyed target held in memory, removing its fields.
    pub(crate) fn unlink(&self, target: &mut Model) {
        if !self.kind.is_foreign_keyed() {
            return;
        }

        target.unset_field(&self.target_field(&self.descriptor.foreign_key()));

        if let Some(type_field) = self.descriptor.type_field()
            && type_field != TYPE_FIELD
        {
            target.unset_field(&self.target_field(&type_field));
        }
    }

    /// Criteria selecting the stored targets of `owner`, static query options included.
    ///
    /// `None` when the owner links nothing, so no query is needed.
    pub(crate) fn criteria_for(&self, owner: &Model) -> Option<Criteria> {
        let options = &self.descriptor.options();
        let owner_id = Value::from_bson(&owner.id_bson());

        let link = match self.kind {
            ProxyKind::BelongsTo | ProxyKind::BelongsToPolymorphic => {
                let id = self.stored_foreign_id(owner)?;
                Criteria::new().eq(ID_FIELD, Value::from_bson(&id))
            }
            ProxyKind::HasOne | ProxyKind::HasMany | ProxyKind::HasManyPolymorphic => {
                Criteria::new().eq(self.descriptor.foreign_key(), owner_id)
            }
            ProxyKind::HasOneAs | ProxyKind::HasManyAs => {
                let criteria = Criteria::new().eq(self.descriptor.foreign_key(), owner_id);
                match self.descriptor.type_field() {
                    Some(type_field) => criteria.eq(type_field, owner.type_name()),
                    None => criteria,
                }
            }
            ProxyKind::HasManyInArray => {
                let ids = self.id_list(owner);
                if ids.is_empty() {
                    return None;
                }
                Criteria::new().any_of(ID_FIELD, Value::Array(ids.iter().map(Value::from_bson).collect()))
            }
            ProxyKind::HasManyInForeignArray => {
                Criteria::new().eq(self.descriptor.foreign_key(), owner_id)
            }
            ProxyKind::HasOneEmbedded
            | ProxyKind::HasOneEmbeddedPolymorphic
            | ProxyKind::HasManyEmbedded
            | ProxyKind::HasManyEmbeddedPolymorphic => return None,
        };

        Some(link.merge(options.query.clone()))
    }

    /// Update operators that detach every stored target from `owner`, if the link
    /// lives on the targets.
    pub(crate) fn nullify_update(&self, owner: &Model) -> Option<Document> {
        match self.kind {
            kind if kind.is_foreign_keyed() => {
                let mut unset = doc! { self.target_field(&self.descriptor.foreign_key()): "" };
                if let Some(type_field) = self.descriptor.type_field()
                    && type_field != TYPE_FIELD
                {
                    unset.insert(self.target_field(&type_field), "");
                }
                Some(doc! { "$unset": unset })
            }
            ProxyKind::HasManyInForeignArray => Some(doc! {
                "$pull": { self.target_field(&self.descriptor.foreign_key()): owner.id_bson() }
            }),
            _ => None,
        }
    }

    /// Ids held in the owner's id list.
    pub(crate) fn id_list(&self, owner: &Model) -> Vec<Bson> {
        match owner.field(&self.owner_field(owner, &self.descriptor.foreign_key())) {
            Some(Bson::Array(ids)) => ids.clone(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn set_id_list(&self, owner: &mut Model, ids: Vec<Bson>) {
        let field = self.owner_field(owner, &self.descriptor.foreign_key());
        owner.set_field(&field, Bson::Array(ids));
    }

    /// Adds an id to the owner's id list. Returns `false` if it was present.
    pub(crate) fn add_id(&self, owner: &mut Model, id: Bson) -> bool {
        let mut ids = self.id_list(owner);
        if ids.contains(&id) {
            return false;
        }

        ids.push(id);
        self.set_id_list(owner, ids);
        true
    }

    /// Removes an id from the owner's id list. Returns `false` if it was absent.
    pub(crate) fn remove_id(&self, owner: &mut Model, id: &Bson) -> bool {
        let mut ids = self.id_list(owner);
        let before = ids.len();
        ids.retain(|existing| existing != id);

        if ids.len() == before {
            return false;
        }

        self.set_id_list(owner, ids);
        true
    }

    /// Embedded targets materialized from the owner document.
    pub(crate) fn embedded(
        &self,
        registry: &ModelRegistry,
        owner: &Model,
    ) -> MapperResult<Vec<Model>> {
        let target = self.target_type()?;

        let documents = match owner.field(self.descriptor.embedded_field()) {
            Some(Bson::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_document().cloned())
                .collect(),
            Some(Bson::Document(document)) => vec![document.clone()],
            _ => Vec::new(),
        };

        Ok(documents
            .into_iter()
            .map(|document| registry.instantiate(target, document))
            .collect())
    }

    /// Stored form of an embedded target. Polymorphic variants record the type name.
    pub(crate) fn embed(&self, target: &Model) -> Bson {
        let mut document = target.to_document();

        if self.kind.is_polymorphic() {
            document.insert(TYPE_FIELD, target.type_name());
        }

        Bson::Document(document)
    }

    /// Writes embedded targets back onto the owner.
    pub(crate) fn store_embedded(&self, owner: &mut Model, targets: &[Model]) {
        let field = self.descriptor.embedded_field().to_string();

        let stored = if self.is_singular() {
            targets.first().map_or(Bson::Null, |target| self.embed(target))
        } else {
            Bson::Array(targets.iter().map(|target| self.embed(target)).collect())
        };

        owner.set_field(&field, stored);
    }

    /// Locates the `in_array` association on the target type that holds the ids
    /// of this association's owners.
    pub(crate) fn inverse(&self, registry: &ModelRegistry) -> MapperResult<Association> {
        let target = self.target_type()?;
        let field = self.descriptor.foreign_key();

        let inverse = target
            .associations()
            .iter()
            .find(|candidate| candidate.options().in_array.as_deref() == Some(field.as_str()))
            .ok_or_else(|| MapperError::AssociationConfiguration {
                model: self.descriptor.owner().to_string(),
                association: self.descriptor.name().to_string(),
                reason: format!("{} declares no in_array association on {field}", target.name()),
            })?;

        Association::from_descriptor(registry, inverse.clone())
    }
}

/// Applies a dependent policy to a target that is leaving the association.
///
/// Without a policy the stored target is left untouched.
pub(crate) async fn release<B: StoreBackend>(
    mapper: &DocumentMapper<B>,
    association: &Association,
    owner: &Model,
    target: &mut Model,
    dependent: Option<Dependent>,
) -> MapperResult<()> {
    if target.is_new() {
        association.unlink(target);
        return Ok(());
    }

    match dependent {
        Some(Dependent::Destroy) => {
            mapper.destroy(target).await?;
        }
        Some(Dependent::Delete | Dependent::DeleteAll) => {
            mapper.delete(target).await?;
        }
        Some(Dependent::Nullify) => {
            if let Some(update) = association.nullify_update(owner) {
                mapper.update_one(target, update).await?;
            }
            association.unlink(target);
            target.mark_persisted();
        }
        None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        association::{AssociationOptions, Dependent},
        key::KeyDefinition,
        types::TypeTag,
    };

    fn registry() -> Arc<ModelRegistry> {
        let registry = ModelRegistry::new();

        registry
            .define(
                ModelType::builder("Person")
                    .key(KeyDefinition::new("name", TypeTag::String))
                    .has_many("comments", AssociationOptions::new().dependent(Dependent::Nullify))
                    .has_many("tags", AssociationOptions::new().in_array("tag_ids"))
                    .has_many("addresses", AssociationOptions::new())
                    .belongs_to("subject", AssociationOptions::new().polymorphic()),
            )
            .unwrap();
        registry
            .define(ModelType::builder("Comment").belongs_to("person", AssociationOptions::new()))
            .unwrap();
        registry
            .define(ModelType::builder("Tag").has_many(
                "people",
                AssociationOptions::new().class_name("Person").in_foreign("tag_ids"),
            ))
            .unwrap();
        registry
            .define(
                ModelType::builder("Address")
                    .embeddable()
                    .key(KeyDefinition::new("city", TypeTag::String)),
            )
            .unwrap();

        registry
    }

    fn person(registry: &ModelRegistry) -> Model {
        registry.build("Person").unwrap()
    }

    #[test]
    fn foreign_keyed_criteria_filter_by_owner_id() {
        let registry = registry();
        let owner = person(&registry);
        let association =
            Association::resolve(&registry, owner.model_type(), "comments").unwrap();

        let query = association
            .criteria_for(&owner)
            .unwrap()
            .render(Some(association.target_type().unwrap().keys()))
            .unwrap();

        assert_eq!(association.kind(), ProxyKind::HasMany);
        assert_eq!(query.filter, doc! { "person_id": owner.id_bson() });
    }

    #[test]
    fn polymorphic_belongs_to_without_link_needs_no_query() {
        let registry = registry();
        let owner = person(&registry);
        let association = Association::resolve(&registry, owner.model_type(), "subject").unwrap();

        assert_eq!(association.kind(), ProxyKind::BelongsToPolymorphic);
        assert!(association.criteria_for(&owner).is_none());
        assert!(association.target_type().is_err());
    }

    #[test]
    fn polymorphic_belongs_to_resolves_the_stored_type() {
        let registry = registry();
        let mut owner = person(&registry);
        let association = Association::resolve(&registry, owner.model_type(), "subject").unwrap();

        let tag = registry.build("Tag").unwrap();
        association.assign_belongs_to(&mut owner, Some(&tag));
        assert_eq!(association.belongs_to_target(&registry, &owner).unwrap().name(), "Tag");

        owner.set_field("subject_type", Bson::String("Ghost".into()));
        assert!(matches!(
            association.belongs_to_target(&registry, &owner),
            Err(MapperError::UnknownModel(ref name)) if name == "Ghost"
        ));
    }

    #[test]
    fn clearing_a_link_removes_its_fields() {
        let registry = registry();
        let mut owner = person(&registry);
        let association = Association::resolve(&registry, owner.model_type(), "subject").unwrap();

        let tag = registry.build("Tag").unwrap();
        association.assign_belongs_to(&mut owner, Some(&tag));
        owner.mark_persisted();

        association.assign_belongs_to(&mut owner, None);
        assert!(owner.field("subject_id").is_none());
        assert!(owner.field("subject_type").is_none());
        assert_eq!(owner.read("subject_id").unwrap(), Value::Nil);
        assert_eq!(
            owner.attributes().update_document(),
            doc! { "$unset": { "subject_id": "", "subject_type": "" } }
        );

        let comments = Association::resolve(&registry, owner.model_type(), "comments").unwrap();
        let mut comment = registry.build("Comment").unwrap();
        comments.link(&owner, &mut comment);
        assert_eq!(comment.field("person_id"), Some(&owner.id_bson()));
        comments.unlink(&mut comment);
        assert!(comment.field("person_id").is_none());
    }

    #[test]
    fn id_lists_are_mutated_in_place() {
        let registry = registry();
        let mut owner = person(&registry);
        let association = Association::resolve(&registry, owner.model_type(), "tags").unwrap();
        let id = Bson::ObjectId(bson::oid::ObjectId::new());

        assert!(association.criteria_for(&owner).is_none());
        assert!(association.add_id(&mut owner, id.clone()));
        assert!(!association.add_id(&mut owner, id.clone()));
        assert_eq!(association.id_list(&owner), vec![id.clone()]);
        assert!(owner.changed_fields().contains(&"tag_ids".to_string()));

        assert!(association.remove_id(&mut owner, &id));
        assert!(association.id_list(&owner).is_empty());
    }

    #[test]
    fn foreign_array_finds_its_inverse() {
        let registry = registry();
        let tag = registry.build("Tag").unwrap();
        let association = Association::resolve(&registry, tag.model_type(), "people").unwrap();
        let inverse = association.inverse(&registry).unwrap();

        assert_eq!(association.kind(), ProxyKind::HasManyInForeignArray);
        assert_eq!(inverse.name(), "tags");
        assert_eq!(
            association.nullify_update(&tag),
            Some(doc! { "$pull": { "tag_ids": tag.id_bson() } })
        );
    }

    #[test]
    fn embedded_targets_round_trip_through_the_owner() {
        let registry = registry();
        let mut owner = person(&registry);
        let association = Association::resolve(&registry, owner.model_type(), "addresses").unwrap();

        let mut address = registry.build("Address").unwrap();
        address.write("city", "Oslo").unwrap();
        association.store_embedded(&mut owner, &[address.clone()]);

        let loaded = association.embedded(&registry, &owner).unwrap();
        assert_eq!(association.kind(), ProxyKind::HasManyEmbedded);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].read("city").unwrap(), Value::from("Oslo"));
    }
}
