//! Error types and result types for mapper and store operations.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`] is raised by [`StoreBackend`](crate::backend::StoreBackend)
//!   implementations (connectivity, duplicate keys, serialization).
//! - [`MapperError`] is raised by the mapping core (typecasting, undeclared keys,
//!   malformed criteria, association configuration). Store errors are wrapped
//!   transparently and never rewritten, so callers can match on them directly.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DuplicateKey(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document violates structural constraints of the backend.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for backend operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A value could not be coerced into the declared type.
///
/// Only surfaced for keys declared `strict`; lenient keys store `null` instead.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot cast {value} to {type_name}")]
pub struct TypecastError {
    /// The type tag the value was cast to.
    pub type_name: String,
    /// Debug rendering of the rejected input.
    pub value: String,
}

impl TypecastError {
    pub fn new(type_name: impl Into<String>, value: impl std::fmt::Debug) -> Self {
        Self {
            type_name: type_name.into(),
            value: format!("{value:?}"),
        }
    }
}

/// Errors raised by the mapping core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapperError {
    /// A strict key rejected a value.
    #[error("Typecast error on key {key}: {source}")]
    Typecast {
        key: String,
        #[source]
        source: TypecastError,
    },
    /// Read or write of a name with no key definition on a static-keys model.
    #[error("Undeclared key {key} on {model}")]
    UndeclaredKey { model: String, key: String },
    /// A key definition is malformed. Raised at definition time.
    #[error("Invalid key {key} on {model}: {reason}")]
    InvalidKey {
        model: String,
        key: String,
        reason: String,
    },
    /// Unsupported operator or malformed criteria, raised before any round trip.
    #[error("Query error: {0}")]
    Query(String),
    /// A lookup that must yield a document yielded nothing.
    #[error("Document not found {id} in collection {collection}")]
    DocumentNotFound { id: String, collection: String },
    /// An association descriptor cannot select a single proxy variant.
    #[error("Association {model}.{association} is misconfigured: {reason}")]
    AssociationConfiguration {
        model: String,
        association: String,
        reason: String,
    },
    /// No model type is registered under the name.
    #[error("Unknown model type: {0}")]
    UnknownModel(String),
    /// The model type declares no association with the name (or of the requested arity).
    #[error("Unknown association {association} on {model}")]
    UnknownAssociation { model: String, association: String },
    /// The operation does not apply to the model in its current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    /// Errors from the store, passed through unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A specialized `Result` type for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;

impl From<BsonError> for MapperError {
    fn from(err: BsonError) -> Self {
        MapperError::Store(err.into())
    }
}

impl From<SerdeJsonError> for MapperError {
    fn from(err: SerdeJsonError) -> Self {
        MapperError::Store(err.into())
    }
}
