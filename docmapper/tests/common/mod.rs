#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use parking_lot::Mutex;

use docmapper::{
    memory::InMemoryStore,
    prelude::*,
};

/// One round trip seen by [`Recording`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Find { collection: String, query: Query },
    Insert { collection: String },
    Update { collection: String, filter: Document, update: Document },
    Delete { collection: String, filter: Document },
    Count { collection: String, filter: Document },
}

/// In-memory backend that records every round trip.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    inner: InMemoryStore,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recording {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    pub fn finds(&self) -> Vec<(String, Query)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Find { collection, query } => Some((collection, query)),
                _ => None,
            })
            .collect()
    }

    pub fn counts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Count { .. }))
            .count()
    }

    pub fn updates(&self) -> Vec<(String, Document, Document)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Update { collection, filter, update } => Some((collection, filter, update)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl StoreBackend for Recording {
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        self.record(Call::Find {
            collection: collection.to_string(),
            query: query.clone(),
        });
        StoreBackend::find(&self.inner, collection, query).await
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<Bson> {
        self.record(Call::Insert {
            collection: collection.to_string(),
        });
        StoreBackend::insert(&self.inner, collection, document).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64> {
        self.record(Call::Update {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
        });
        StoreBackend::update_many(&self.inner, collection, filter, update).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        self.record(Call::Delete {
            collection: collection.to_string(),
            filter: filter.clone(),
        });
        StoreBackend::delete_many(&self.inner, collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        self.record(Call::Count {
            collection: collection.to_string(),
            filter: filter.clone(),
        });
        StoreBackend::count(&self.inner, collection, filter).await
    }
}

/// People with comments, tags, addresses and a profile.
///
/// - `Person`: `name`, `age`, `active`; comments nullified on destroy, tags in an id
///   list, embedded addresses, a destroyed profile and a polymorphic `subject`.
/// - `Comment`: `body`, belongs to a person.
/// - `Tag`: `label`, reaches its people through their `tag_ids`.
/// - `Profile`: `bio`, belongs to a person.
/// - `Address`: embeddable, `city`.
/// - `Admin`: a `Person` subtype.
pub fn registry() -> Arc<ModelRegistry> {
    let registry = ModelRegistry::new();

    registry
        .define(
            ModelType::builder("Address")
                .embeddable()
                .key(KeyDefinition::new("city", TypeTag::String)),
        )
        .unwrap();
    registry
        .define(
            ModelType::builder("Person")
                .key(KeyDefinition::new("name", TypeTag::String))
                .key(KeyDefinition::new("age", TypeTag::Integer))
                .key(KeyDefinition::new("active", TypeTag::Boolean))
                .has_many("comments", AssociationOptions::new().dependent(Dependent::Nullify))
                .has_many("tags", AssociationOptions::new().in_array("tag_ids"))
                .has_many("addresses", AssociationOptions::new())
                .has_one("profile", AssociationOptions::new().dependent(Dependent::Destroy))
                .belongs_to("subject", AssociationOptions::new().polymorphic())
                .scope("adults", |criteria| criteria.gte("age", 18)),
        )
        .unwrap();
    registry
        .define(ModelType::builder("Admin").inherits("Person"))
        .unwrap();
    registry
        .define(
            ModelType::builder("Comment")
                .key(KeyDefinition::new("body", TypeTag::String))
                .belongs_to("person", AssociationOptions::new()),
        )
        .unwrap();
    registry
        .define(
            ModelType::builder("Tag")
                .key(KeyDefinition::new("label", TypeTag::String))
                .has_many(
                    "people",
                    AssociationOptions::new().class_name("Person").in_foreign("tag_ids"),
                ),
        )
        .unwrap();
    registry
        .define(
            ModelType::builder("Profile")
                .key(KeyDefinition::new("bio", TypeTag::String))
                .belongs_to("person", AssociationOptions::new()),
        )
        .unwrap();

    registry.validate().unwrap();
    registry
}

pub fn mapper() -> DocumentMapper<Recording> {
    DocumentMapper::new(Recording::default(), registry())
}

/// John 28, Steve 30, Bob 31 and Amy 25, in that order.
pub async fn people(mapper: &DocumentMapper<Recording>) -> Vec<Model> {
    let mut people = Vec::new();

    for (name, age) in [("John", 28), ("Steve", 30), ("Bob", 31), ("Amy", 25)] {
        people.push(
            mapper
                .create("Person", [("name", Value::from(name)), ("age", Value::from(age))])
                .await
                .unwrap(),
        );
    }

    mapper.backend().reset();
    people
}
