//! Storage traits and implementations
//!
//! The queue store is the single source of truth for due/terminal status.
//! The trait-based design allows swapping between the in-memory store (tests)
//! and the SQLite store (production) without touching the dispatch core.

mod attachment;
mod memory;
mod sqlite;
mod traits;

pub use attachment::{AttachmentStore, FileAttachmentStore, InMemoryAttachmentStore};
pub use memory::InMemoryQueueStore;
pub use sqlite::SqliteQueueStore;
pub use traits::QueueStore;
