//! The core of the docmapper project: a typed object-document mapper over schemaless
//! document stores.
//!
//! This crate provides:
//!
//! - **Type coercion** ([`types`]) - Registry of per-type casts from loose input to stored values
//! - **Keys** ([`key`]) - Declared attributes with types, defaults and requirements
//! - **Attributes** ([`attributes`]) - Per-instance attribute storage with dirty tracking
//! - **Criteria** ([`query`]) - Chainable query builder rendered to a store query
//! - **Models** ([`model`]) - Model types, the registry that resolves them, and instances
//! - **Associations** ([`association`]) - Descriptors and lazy proxies for linked models
//! - **Mapper** ([`mapper`]) - Persistence lifecycle, callbacks and dependent cleanup
//! - **Finders** ([`finder`]) - `find_by_*` style dynamic finders
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing document stores
//! - **Error handling** ([`error`]) - Store and mapper error types
//! - **Pagination** ([`page`]) - Page parameters and page results
//!
//! # Example
//!
//! ```ignore
//! use docmapper_core::{
//!     key::KeyDefinition, mapper::DocumentMapper, model::{ModelRegistry, ModelType},
//!     types::TypeTag,
//! };
//!
//! let registry = ModelRegistry::new();
//! registry.define(
//!     ModelType::builder("Person")
//!         .key(KeyDefinition::new("name", TypeTag::String))
//!         .key(KeyDefinition::new("age", TypeTag::Integer)),
//! )?;
//!
//! let mapper = DocumentMapper::new(backend, registry);
//! let john = mapper.create("Person", [("name", "John"), ("age", "30")]).await?;
//!
//! let adults = mapper.query("Person")?.gt("age", 27).all().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_core;

pub mod association;
pub mod attributes;
pub mod backend;
pub mod callbacks;
pub mod error;
pub mod finder;
pub mod inflect;
pub mod key;
pub mod mapper;
pub mod model;
pub mod model_query;
pub mod page;
pub mod query;
pub mod types;
pub mod value;
