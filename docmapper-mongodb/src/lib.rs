//! MongoDB backend implementation for docmapper.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. The
//! mapper already renders filters and updates as MongoDB operator documents, so they
//! are sent to the server as they are.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmapper = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docmapper::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
