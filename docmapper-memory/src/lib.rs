//! In-memory document storage backend for docmapper.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend`
//! trait. It evaluates the same operator documents a document database would receive,
//! which makes it suitable for development and tests.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Operator evaluation** - `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`,
//!   `$all`, `$exists`, `$size`, `$and`, `$or` and `$nor` filters
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$push`, `$addToSet` and `$pull`
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ModelRegistry::new();
//!     registry.define(ModelType::builder("Person").key(KeyDefinition::new("name", TypeTag::String)))?;
//!
//!     let mapper = DocumentMapper::new(InMemoryStore::builder().build().await?, registry);
//!     mapper.create("Person", [("name", "Alice")]).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
