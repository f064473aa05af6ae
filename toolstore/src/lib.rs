//! Storage and synchronization engine for the tool registry aggregator.
//!
//! The crate owns the persisted record store and the three core engines that
//! keep it in step with the external sources:
//!
//! - [`reconcile`]: the generic add/remove set diff applied to every child
//!   relation of a tool.
//! - [`citations`]: multi-source citation resolution, deduplication and the
//!   per-tool impact/year rollup.
//! - [`sync`]: the per-tool synchronization state machine driving the source
//!   adapters and the store.
//! - [`materialize`]: cached, denormalized result documents for saved
//!   queries.
//!
//! Concrete source clients live in their own crates and implement the traits
//! in [`fetch`]; the store is always passed as one explicit
//! [`store::RecordStore`] handle, never held in a global.

pub mod citations;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod impact;
pub mod materialize;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod sync;

pub use crate::citations::{CitationAggregator, YearMode};
pub use crate::config::StoreConfig;
pub use crate::errors::{Result, SyncError};
pub use crate::materialize::QueryMaterializer;
pub use crate::store::{RecordStore, SqliteStore};
pub use crate::sync::{SyncOutcome, SyncReport, ToolSynchronizer};
