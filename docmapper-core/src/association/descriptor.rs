//! Association descriptors and proxy variant selection.

use std::fmt;

use crate::{
    error::{MapperError, MapperResult},
    inflect,
    key::TYPE_FIELD,
    query::{Criteria, SortDirection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssociationKind::BelongsTo => "belongs_to",
            AssociationKind::HasOne => "has_one",
            AssociationKind::HasMany => "has_many",
        })
    }
}

/// What happens to related documents when the owner is destroyed or the relation
/// replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependent {
    /// Destroy each related model, running its hooks and dependents.
    Destroy,
    /// Remove related documents directly, without hooks.
    Delete,
    /// Same as [`Dependent::Delete`], one bulk remove.
    DeleteAll,
    /// Clear the foreign key on related documents.
    Nullify,
}

/// Options of an association declaration.
#[derive(Debug, Clone, Default)]
pub struct AssociationOptions {
    pub class_name: Option<String>,
    pub foreign_key: Option<String>,
    /// Name of the inverse polymorphic `belongs_to` on the target.
    pub as_: Option<String>,
    pub polymorphic: bool,
    /// Field on the owner holding the list of target ids.
    pub in_array: Option<String>,
    /// Field on the target holding the list of owner ids.
    pub in_foreign: Option<String>,
    pub dependent: Option<Dependent>,
    /// Static conditions, sort and limit merged into every target query.
    pub query: Criteria,
}

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    /// Target side of a polymorphic `belongs_to`, keyed by `{name}_id`/`{name}_type`.
    pub fn as_(mut self, name: impl Into<String>) -> Self {
        self.as_ = Some(name.into());
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    pub fn in_array(mut self, field: impl Into<String>) -> Self {
        self.in_array = Some(field.into());
        self
    }

    pub fn in_foreign(mut self, field: impl Into<String>) -> Self {
        self.in_foreign = Some(field.into());
        self
    }

    pub fn dependent(mut self, dependent: Dependent) -> Self {
        self.dependent = Some(dependent);
        self
    }

    pub fn query(mut self, criteria: Criteria) -> Self {
        self.query = self.query.merge(criteria);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query = self.query.sort(field, direction);
        self
    }
}

/// Proxy implementation selected for an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    BelongsTo,
    BelongsToPolymorphic,
    HasOne,
    HasOneAs,
    HasOneEmbedded,
    HasOneEmbeddedPolymorphic,
    HasMany,
    HasManyAs,
    HasManyPolymorphic,
    HasManyInArray,
    HasManyInForeignArray,
    HasManyEmbedded,
    HasManyEmbeddedPolymorphic,
}

impl ProxyKind {
    pub fn is_embedded(self) -> bool {
        matches!(
            self,
            ProxyKind::HasOneEmbedded
                | ProxyKind::HasOneEmbeddedPolymorphic
                | ProxyKind::HasManyEmbedded
                | ProxyKind::HasManyEmbeddedPolymorphic
        )
    }

    pub fn is_polymorphic(self) -> bool {
        matches!(
            self,
            ProxyKind::BelongsToPolymorphic
                | ProxyKind::HasOneEmbeddedPolymorphic
                | ProxyKind::HasManyPolymorphic
                | ProxyKind::HasManyEmbeddedPolymorphic
        )
    }

    /// Whether the target documents carry a foreign key pointing at the owner.
    pub fn is_foreign_keyed(self) -> bool {
        matches!(
            self,
            ProxyKind::HasOne
                | ProxyKind::HasOneAs
                | ProxyKind::HasMany
                | ProxyKind::HasManyAs
                | ProxyKind::HasManyPolymorphic
        )
    }
}

/// A declared relationship between two model types.
#[derive(Debug, Clone)]
pub struct AssociationDescriptor {
    kind: AssociationKind,
    name: String,
    owner: String,
    target: String,
    options: AssociationOptions,
}

impl AssociationDescriptor {
    /// Creates and validates a descriptor.
    ///
    /// # Errors
    ///
    /// [`MapperError::AssociationConfiguration`] when the options cannot select a single
    /// proxy variant whatever the target turns out to be.
    pub fn new(
        kind: AssociationKind,
        name: impl Into<String>,
        owner: impl Into<String>,
        options: AssociationOptions,
    ) -> MapperResult<Self> {
        let name = name.into();
        let target = options
            .class_name
            .clone()
            .unwrap_or_else(|| inflect::class_name(&name, kind == AssociationKind::HasMany));

        let descriptor = Self {
            kind,
            name,
            owner: owner.into(),
            target,
            options,
        };
        descriptor.validate()?;

        Ok(descriptor)
    }

    fn misconfigured(&self, reason: impl Into<String>) -> MapperError {
        MapperError::AssociationConfiguration {
            model: self.owner.clone(),
            association: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn validate(&self) -> MapperResult<()> {
        let o = &self.options;

        if self.name.is_empty() {
            return Err(self.misconfigured("association name is empty"));
        }

        match self.kind {
            AssociationKind::BelongsTo => {
                if o.as_.is_some() || o.in_array.is_some() || o.in_foreign.is_some() {
                    return Err(self.misconfigured("belongs_to takes no as, in_array or in_foreign"));
                }
                if o.dependent.is_some() {
                    return Err(self.misconfigured("belongs_to does not support dependent"));
                }
            }
            AssociationKind::HasOne => {
                if o.in_array.is_some() || o.in_foreign.is_some() {
                    return Err(self.misconfigured("has_one cannot be stored in an id array"));
                }
                if o.as_.is_some() && o.polymorphic {
                    return Err(self.misconfigured("as and polymorphic are mutually exclusive"));
                }
            }
            AssociationKind::HasMany => {
                if o.in_array.is_some() && o.in_foreign.is_some() {
                    return Err(self.misconfigured("in_array and in_foreign are mutually exclusive"));
                }
                if (o.in_array.is_some() || o.in_foreign.is_some())
                    && (o.as_.is_some() || o.polymorphic)
                {
                    return Err(self.misconfigured(
                        "id array associations cannot be polymorphic or inverse-keyed",
                    ));
                }
                if o.as_.is_some() && o.polymorphic {
                    return Err(self.misconfigured("as and polymorphic are mutually exclusive"));
                }
            }
        }

        Ok(())
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning model type name.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Declared target model type name.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn options(&self) -> &AssociationOptions {
        &self.options
    }

    pub fn dependent(&self) -> Option<Dependent> {
        self.options.dependent
    }

    /// Selects the proxy variant once the target's embeddability is known.
    pub fn proxy_kind(&self, target_embeddable: bool) -> MapperResult<ProxyKind> {
        let o = &self.options;

        if target_embeddable {
            if o.dependent.is_some() {
                return Err(self.misconfigured("embedded targets cannot have dependent"));
            }
            if o.in_array.is_some() || o.in_foreign.is_some() || o.as_.is_some() {
                return Err(self.misconfigured(
                    "embedded targets cannot use in_array, in_foreign or as",
                ));
            }
        }

        Ok(match (self.kind, target_embeddable) {
            (AssociationKind::BelongsTo, _) if o.polymorphic => ProxyKind::BelongsToPolymorphic,
            (AssociationKind::BelongsTo, _) => ProxyKind::BelongsTo,
            (AssociationKind::HasOne, true) if o.polymorphic => ProxyKind::HasOneEmbeddedPolymorphic,
            (AssociationKind::HasOne, true) => ProxyKind::HasOneEmbedded,
            (AssociationKind::HasOne, false) if o.as_.is_some() => ProxyKind::HasOneAs,
            (AssociationKind::HasOne, false) => ProxyKind::HasOne,
            (AssociationKind::HasMany, true) if o.polymorphic => ProxyKind::HasManyEmbeddedPolymorphic,
            (AssociationKind::HasMany, true) => ProxyKind::HasManyEmbedded,
            (AssociationKind::HasMany, false) if o.in_array.is_some() => ProxyKind::HasManyInArray,
            (AssociationKind::HasMany, false) if o.in_foreign.is_some() => {
                ProxyKind::HasManyInForeignArray
            }
            (AssociationKind::HasMany, false) if o.as_.is_some() => ProxyKind::HasManyAs,
            (AssociationKind::HasMany, false) if o.polymorphic => ProxyKind::HasManyPolymorphic,
            (AssociationKind::HasMany, false) => ProxyKind::HasMany,
        })
    }

    /// Field holding the link: on the owner for `belongs_to` and id arrays, on the
    /// target otherwise.
    pub fn foreign_key(&self) -> String {
        let o = &self.options;

        if let Some(field) = o.in_array.as_ref().or(o.in_foreign.as_ref()) {
            return field.clone();
        }

        if let Some(field) = &o.foreign_key {
            return field.clone();
        }

        match (&self.kind, &o.as_) {
            (AssociationKind::BelongsTo, _) => format!("{}_id", self.name),
            (_, Some(inverse)) => format!("{inverse}_id"),
            _ => format!("{}_id", inflect::snake(&self.owner)),
        }
    }

    /// Field holding the type discriminator, for polymorphic and inverse-keyed links.
    pub fn type_field(&self) -> Option<String> {
        match (&self.kind, &self.options.as_) {
            (AssociationKind::BelongsTo, _) if self.options.polymorphic => {
                Some(format!("{}_type", self.name))
            }
            (AssociationKind::BelongsTo, _) => None,
            (_, Some(inverse)) => Some(format!("{inverse}_type")),
            _ if self.options.polymorphic => Some(TYPE_FIELD.to_string()),
            _ => None,
        }
    }

    /// Owner field holding embedded targets.
    pub fn embedded_field(&self) -> &str {
        &self.name
    }
}
