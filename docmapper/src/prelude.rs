//! Convenient re-exports of commonly used types from docmapper.
//!
//! ```ignore
//! use docmapper::prelude::*;
//! ```

pub use docmapper_core::{
    association::{AssociationOptions, Dependent, ManyProxy, OneProxy, ProxyKind},
    backend::{DynStoreBackend, StoreBackend, StoreBackendBuilder},
    callbacks::{CallbackEvent, Errors, Flow},
    error::{MapperError, MapperResult, StoreError, StoreResult},
    finder::{DynamicFinder, FinderResult},
    key::{DefaultValue, KeyDefinition},
    mapper::{DocumentMapper, SaveOptions},
    model::{Model, ModelRegistry, ModelType},
    model_query::ModelQuery,
    page::{Page, PaginationParams},
    query::{Criteria, Operator, Query, SortDirection},
    types::TypeTag,
    value::Value,
};
