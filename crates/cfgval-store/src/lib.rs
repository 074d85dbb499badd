//! Store contract for cfgval and an in-process implementation.
//!
//! The validator reads configuration through the async [`Store`] trait:
//! key existence, glob key listing, hash reads, pipelined batches, predicate
//! lookups and per-key change notifications.

pub mod memory;
pub mod notify;
pub mod pipeline;
pub mod search;
pub mod store;

pub use memory::{MemoryStore, StoreStats};
pub use notify::{ChangeEvent, ChangeKind, Subscription};
pub use pipeline::{Command, Pipeline, Reply};
pub use search::{Predicate, Record, Search};
pub use store::{Store, StoreError, StoreResult};

pub use cfgval_core::FieldMap;
