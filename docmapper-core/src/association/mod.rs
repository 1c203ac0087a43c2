//! Associations between model types.
//!
//! An association is declared on a [`ModelType`](crate::model::ModelType) as an
//! [`AssociationDescriptor`]. When the registry resolves it, the descriptor picks one
//! [`ProxyKind`] from its kind and options, and that choice fixes how links are stored:
//!
//! | kind | stored as |
//! |---|---|
//! | `belongs_to` | foreign key (and type name) on the owner |
//! | `has_one`, `has_many` | foreign key (and type name) on the target |
//! | `has_many` with `in_array` | id list on the owner |
//! | `has_many` with `in_foreign` | id list on the target |
//! | embeddable target | sub-document or array inside the owner |
//!
//! The proxies, [`OneProxy`] and [`ManyProxy`], are obtained from the
//! [`DocumentMapper`](crate::mapper::DocumentMapper). They load their target lazily.

mod descriptor;
mod many;
mod one;
pub(crate) mod proxy;

pub use descriptor::{AssociationDescriptor, AssociationKind, AssociationOptions, Dependent, ProxyKind};
pub use many::ManyProxy;
pub use one::OneProxy;
pub use proxy::Association;
