//! Model types, the model registry and model instances.
//!
//! A model type is declared with [`ModelType::builder`] and registered in a
//! [`ModelRegistry`], which resolves key types and association descriptors. Instances
//! ([`Model`]) hold an [`AttributeContainer`](crate::attributes::AttributeContainer) and
//! their persistence state.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//!
//! let registry = ModelRegistry::new();
//! let person = registry.define(
//!     ModelType::builder("Person")
//!         .key(KeyDefinition::new("name", TypeTag::String))
//!         .key(KeyDefinition::new("age", TypeTag::Integer)),
//! )?;
//!
//! let mut john = Model::with_attributes(person, [("name", "John")])?;
//! assert_eq!(john.read("age")?, Value::Nil);
//! assert_eq!(john.changed_fields(), vec!["name"]);
//! ```

mod instance;
mod model_type;
mod registry;

pub use instance::Model;
pub use model_type::{ModelType, ModelTypeBuilder, Scope};
pub use registry::ModelRegistry;
