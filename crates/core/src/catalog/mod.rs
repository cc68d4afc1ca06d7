//! # Action Catalog
//!
//! Curated, platform-specific automation actions and the semantic index the
//! tool mapper queries.
//!
//! ```text
//! scraped JSON ──import_actions──▶ CatalogStore (SQLite)
//!                                      │ load_index (startup)
//!                                      ▼
//!                     ActionIndex ◀── Embedder (hashing | openai)
//! ```

pub mod descriptor;
pub mod embedding;
pub mod import;
pub mod index;
pub mod store;

pub use descriptor::{ActionDescriptor, ActionSummary, Platform};
pub use embedding::{cosine_similarity, Embedder, HashingEmbedder, OpenAiEmbedder};
pub use import::{import_actions, parse_export, ScrapedAction};
pub use index::{ActionIndex, ActionSearch, ScoredAction};
pub use store::{load_index, CatalogStore};
