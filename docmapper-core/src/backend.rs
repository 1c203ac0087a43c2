//! Storage backend abstraction.
//!
//! The mapper never talks to a database directly. Every round trip goes through the
//! [`StoreBackend`] trait, which works on store-native values: [`Query`] for reads and
//! BSON filter/update documents for writes, using `$`-prefixed operators.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DynStoreBackend`]: A trait for dynamic dispatch over backend implementations
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmapper::backend::StoreBackend;
//! use docmapper::query::Query;
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! let id = backend.insert("people", doc! { "name": "Alice", "age": 30 }).await?;
//! let people = backend.find("people", Query::filter(doc! { "age": { "$gt": 27 } })).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{any::Any, fmt::Debug};

use crate::{
    error::StoreResult,
    query::{Operator, Query},
};

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe. The mapper itself issues round trips
/// sequentially, but one backend may be shared by many mappers.
///
/// # Error Handling
///
/// Operations return [`StoreResult<T>`](crate::error::StoreResult). The mapper passes
/// these errors through to its callers unchanged and never retries.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the documents matching the query filter, sorted, skipped, limited and
    /// projected as requested.
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>>;

    /// Inserts a document and returns its `_id`, generating one when absent.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`](crate::error::StoreError::DuplicateKey) if a document
    /// with the same `_id` exists.
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<Bson>;

    /// Applies update operators (`$set`, `$unset`, ...) to every matching document.
    ///
    /// Returns the number of documents matched.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64>;

    /// Removes every matching document and returns how many were removed.
    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    /// Counts the matching documents.
    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    /// Whether the backend can evaluate a filter operator.
    ///
    /// Criteria using an unsupported operator are rejected before any round trip.
    fn supports_operator(&self, _op: Operator) -> bool {
        true
    }

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> StoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        StoreBackend::find(*self, collection, query).await
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<Bson> {
        StoreBackend::insert(*self, collection, document).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64> {
        StoreBackend::update_many(*self, collection, filter, update).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        StoreBackend::delete_many(*self, collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        StoreBackend::count(*self, collection, filter).await
    }

    fn supports_operator(&self, op: Operator) -> bool {
        StoreBackend::supports_operator(*self, op)
    }
}

/// Object-safe counterpart of [`StoreBackend`], for choosing a backend at runtime.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>>;
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<Bson>;
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64>;
    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64>;
    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64>;
    fn supports_operator(&self, op: Operator) -> bool;
    async fn shutdown_boxed(self: Box<Self>) -> StoreResult<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

#[async_trait]
impl<B: StoreBackend + Send + Sync + 'static> DynStoreBackend for B {
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        StoreBackend::find(self, collection, query).await
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<Bson> {
        StoreBackend::insert(self, collection, document).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64> {
        StoreBackend::update_many(self, collection, filter, update).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        StoreBackend::delete_many(self, collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        StoreBackend::count(self, collection, filter).await
    }

    fn supports_operator(&self, op: Operator) -> bool {
        StoreBackend::supports_operator(self, op)
    }

    async fn shutdown_boxed(self: Box<Self>) -> StoreResult<()> {
        StoreBackend::shutdown(*self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Lets a mapper run on a backend chosen at runtime.
#[async_trait]
impl StoreBackend for Box<dyn DynStoreBackend> {
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        DynStoreBackend::find(&**self, collection, query).await
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<Bson> {
        DynStoreBackend::insert(&**self, collection, document).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64> {
        DynStoreBackend::update_many(&**self, collection, filter, update).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        DynStoreBackend::delete_many(&**self, collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        DynStoreBackend::count(&**self, collection, filter).await
    }

    fn supports_operator(&self, op: Operator) -> bool {
        DynStoreBackend::supports_operator(&**self, op)
    }

    async fn shutdown(self) -> StoreResult<()> {
        DynStoreBackend::shutdown_boxed(self).await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> StoreResult<Self::Backend>;
}
