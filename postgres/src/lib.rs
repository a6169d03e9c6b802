//! `PostgreSQL` document store for the studio booking engine.
//!
//! This crate implements the `DocumentStore` trait from `studio-core` on top
//! of a single JSONB table. It supports:
//!
//! - Per-document create/read/update/delete
//! - Filtered, ordered and paged listing
//! - Conditional updates (compare-and-set on document fields)
//! - Partial unique expression indexes over document fields
//!
//! # Example
//!
//! ```ignore
//! use studio_postgres::PostgresDocumentStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresDocumentStore::connect("postgres://localhost/studio", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod document_store;

pub use document_store::PostgresDocumentStore;
