//! # docchat
//!
//! Multi-tenant document question answering: tenants upload documents,
//! visitors ask questions, answers are generated only from the tenant's
//! own passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────────┐   ┌──────────┐
//! │  upload  │──▶│ extract ▸ chunk ▸ embed │──▶│  SQLite  │
//! └──────────┘   └─────────────────────────┘   └────┬─────┘
//!                                                   │
//!   question ──▶ guard ▸ reserve ▸ retrieve ◀───────┘
//!                                   │
//!                                   ▼
//!                         generate ▸ commit usage ──▶ answer
//! ```
//!
//! Pure logic (chunking, retrieval ranking, quota arithmetic, injection
//! patterns, pricing) lives in `docchat-core`; this crate adds the SQLite
//! store, file extraction and the HTTP model backends.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema bootstrap |
//! | [`sqlite_store`] | SQLite implementation of the store trait |
//! | [`extract`] | Text extraction from PDF, DOCX, HTML and plain text |
//! | [`upstream`] | Shared HTTP plumbing and failure normalization |
//! | [`embedding`] | Embedding router (OpenAI / Ollama) |
//! | [`generation`] | Generation router (OpenAI / Anthropic / Gemini / Ollama) |
//! | [`governor`] | Quota reservation and usage ledger |
//! | [`upload`] | Document submission and deletion |
//! | [`ingest`] | Ingestion pipeline |
//! | [`answer`] | Question answering flow |

pub mod answer;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod governor;
pub mod ingest;
pub mod migrate;
pub mod sqlite_store;
pub mod upload;
pub mod upstream;
