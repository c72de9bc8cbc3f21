//! # docchat core
//!
//! Pure, runtime-agnostic logic for docchat: data models, chunking,
//! retrieval ranking, quota accounting, pricing, the injection guard,
//! and the tenant-scoped store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! `docchat` app crate supplies the SQLite store and network backends.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod guard;
pub mod models;
pub mod pricing;
pub mod quota;
pub mod retrieval;
pub mod store;

pub use error::{RagError, Result};
