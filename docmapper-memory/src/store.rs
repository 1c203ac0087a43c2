//! In-memory storage implementation.
//!
//! Documents are kept per collection in insertion order, behind an async-aware
//! read-write lock.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::trace;

use docmapper_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{StoreError, StoreResult},
    key::ID_FIELD,
    query::{Query, SortDirection},
};

use crate::evaluator::{Comparable, DocumentEvaluator, apply_update, lookup};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones
/// share the same data.
///
/// Queries scan every document of a collection; there are no indexes. Unfiltered
/// results come back in insertion order.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::StoreBackend;
/// use docmapper::query::Query;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
///
/// let id = store.insert("people", doc! { "name": "Alice", "age": 30 }).await?;
/// let people = store.find("people", Query::filter(doc! { "_id": id })).await?;
/// assert_eq!(people.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Names of the collections holding at least one document.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names = self
            .store
            .read()
            .await
            .iter()
            .filter(|(_, documents)| !documents.is_empty())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Removes every document of every collection.
    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    fn sort_documents(documents: &mut [&Document], query: &Query) {
        if query.sort.is_empty() {
            return;
        }

        documents.sort_by(|a, b| {
            for sort in &query.sort {
                let left = lookup(a, &sort.field)
                    .map(Comparable::from)
                    .unwrap_or(Comparable::Null);
                let right = lookup(b, &sort.field)
                    .map(Comparable::from)
                    .unwrap_or(Comparable::Null);

                let ordering = match sort.direction {
                    SortDirection::Asc => left.total_cmp(&right),
                    SortDirection::Desc => right.total_cmp(&left),
                };

                if ordering != Ordering::Equal {
                    return ordering;
                }
            }

            Ordering::Equal
        });
    }

    fn project(document: &Document, projection: &[String]) -> Document {
        if projection.is_empty() {
            return document.clone();
        }

        document
            .iter()
            .filter(|(field, _)| {
                field.as_str() == ID_FIELD
                    || projection.iter().any(|wanted| {
                        wanted == *field
                            || wanted
                                .split_once('.')
                                .is_some_and(|(head, _)| head == field.as_str())
                    })
            })
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = DocumentEvaluator::filter_documents(documents, &query.filter)?;
        Self::sort_documents(&mut matched, &query);

        trace!(collection, matched = matched.len(), "evaluated in-memory query");

        Ok(matched
            .into_iter()
            .skip(query.skip.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|document| Self::project(document, &query.projection))
            .collect())
    }

    async fn insert(&self, collection: &str, mut document: Document) -> StoreResult<Bson> {
        let id = match document.get(ID_FIELD) {
            Some(id) if !matches!(id, Bson::Null) => id.clone(),
            _ => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_FIELD, id.clone());
                id
            }
        };

        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        let duplicate = documents.iter().any(|existing| {
            existing
                .get(ID_FIELD)
                .is_some_and(|existing| Comparable::from(existing) == Comparable::from(&id))
        });
        if duplicate {
            return Err(StoreError::DuplicateKey(id.to_string(), collection.to_string()));
        }

        documents.push(document);

        Ok(id)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut matched = 0;
        for document in documents.iter_mut() {
            if DocumentEvaluator::new(document).matches(&filter)? {
                // Apply to a copy so a failing operator leaves the document untouched.
                let mut updated = document.clone();
                apply_update(&mut updated, &update)?;
                *document = updated;
                matched += 1;
            }
        }

        Ok(matched)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let before = documents.len();

        // Evaluate first so a malformed filter removes nothing.
        let mut doomed = Vec::with_capacity(before);
        for document in documents.iter() {
            doomed.push(DocumentEvaluator::new(document).matches(&filter)?);
        }

        let mut doomed = doomed.into_iter();
        documents.retain(|_| !doomed.next().unwrap_or(false));

        Ok((before - documents.len()) as u64)
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(0);
        };

        Ok(DocumentEvaluator::filter_documents(documents, &filter)?.len() as u64)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmapper_core::query::Sort;

    async fn people() -> InMemoryStore {
        let store = InMemoryStore::builder().build().await.unwrap();

        for (name, age) in [("John", 28), ("Steve", 30), ("Bob", 31), ("Amy", 25)] {
            store
                .insert("people", doc! { "name": name, "age": age })
                .await
                .unwrap();
        }

        store
    }

    #[tokio::test]
    async fn finds_with_filter_sort_skip_and_limit() {
        let store = people().await;

        let query = Query {
            filter: doc! { "age": { "$gt": 27 } },
            sort: vec![Sort {
                field: "age".into(),
                direction: SortDirection::Asc,
            }],
            limit: Some(1),
            skip: Some(1),
            projection: vec!["age".into()],
        };

        let found = store.find("people", query).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_i32("age").unwrap(), 30);
        assert!(found[0].get("name").is_none());
        assert!(found[0].get("_id").is_some());
    }

    #[tokio::test]
    async fn insert_generates_ids_and_rejects_duplicates() {
        let store = InMemoryStore::new();

        let id = store.insert("people", doc! { "name": "John" }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let err = store
            .insert("people", doc! { "_id": id.clone(), "name": "Copy" })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_, ref c) if c == "people"));
    }

    #[tokio::test]
    async fn updates_deletes_and_counts() {
        let store = people().await;

        let updated = store
            .update_many(
                "people",
                doc! { "age": { "$lt": 30 } },
                doc! { "$set": { "junior": true } },
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(store.count("people", doc! { "junior": true }).await.unwrap(), 2);

        let deleted = store
            .delete_many("people", doc! { "junior": { "$exists": true } })
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("people", doc! {}).await.unwrap(), 2);
        assert_eq!(store.count("missing", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_updates_leave_documents_untouched() {
        let store = people().await;

        let result = store
            .update_many(
                "people",
                doc! { "name": "John" },
                doc! { "$set": { "age": 40 }, "$inc": { "name": 1 } },
            )
            .await;
        assert!(result.is_err());

        let john = store
            .find("people", Query::filter(doc! { "name": "John" }))
            .await
            .unwrap();
        assert_eq!(john[0].get_i32("age").unwrap(), 28);
    }
}
