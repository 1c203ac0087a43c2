use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document, oid::ObjectId};
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions},
};
use tracing::debug;

use docmapper_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{StoreError, StoreResult},
    key::ID_FIELD,
    query::Query,
};

const DUPLICATE_KEY: i32 = 11000;

fn backend_error(err: MongoError) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.skip {
            options.skip = Some(skip as u64);
        }
        options.sort = query.sort_document();
        options.projection = query.projection_document();

        debug!(collection, filter = %query.filter, "running find");

        self.get_collection(collection)
            .find(query.filter)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
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

        self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(|err| match err.kind.as_ref() {
                ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
                    StoreError::DuplicateKey(id.to_string(), collection.to_string())
                }
                _ => backend_error(err),
            })?;

        Ok(id)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .update_many(filter, update)
            .await
            .map_err(backend_error)?
            .matched_count)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(backend_error)
    }

    async fn shutdown(self) -> StoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Connects a [`MongoDbStore`] from a connection string and database name.
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| StoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| StoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
