//! Main docmapper crate: a typed object-document mapper for schemaless document stores.
//!
//! This crate is the entry point for users of docmapper. It re-exports the mapping core
//! and gives access to the storage backends.
//!
//! # Features
//!
//! - **Declared keys** - Typed attributes with coercion, defaults and dirty tracking
//! - **Chainable criteria** - Queries built from conditions, sorts and paging
//! - **Associations** - `belongs_to`, `has_one` and `has_many` over foreign keys, id
//!   lists or embedded documents, with dependent cleanup
//! - **Lifecycle callbacks** - Hooks around validation, save, create, update and destroy
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ModelRegistry::new();
//!     registry.define(
//!         ModelType::builder("Person")
//!             .key(KeyDefinition::new("name", TypeTag::String))
//!             .key(KeyDefinition::new("age", TypeTag::Integer))
//!             .has_many("comments", AssociationOptions::new().dependent(Dependent::Destroy)),
//!     )?;
//!     registry.define(
//!         ModelType::builder("Comment")
//!             .key(KeyDefinition::new("body", TypeTag::String))
//!             .belongs_to("person", AssociationOptions::new()),
//!     )?;
//!
//!     let mapper = DocumentMapper::new(InMemoryStore::builder().build().await?, registry);
//!
//!     let mut john = mapper.create("Person", [("name", "John"), ("age", "30")]).await?;
//!     mapper.many(&mut john, "comments")?.create([("body", "Hi")]).await?;
//!
//!     let adults = mapper.query("Person")?.gt("age", 27).all().await?;
//!     println!("{adults:?}");
//!
//!     mapper.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! A mapper over a concrete backend can be turned into one over a boxed
//! [`DynStoreBackend`](backend::DynStoreBackend) with `into_dyn`, for choosing the
//! backend at runtime.
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docmapper_core::{
    association, attributes, backend, callbacks, error, finder, inflect, key, mapper, model,
    model_query, page, query, types, value,
};

pub use async_trait::async_trait;
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmapper_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmapper_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
