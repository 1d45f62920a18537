//! Storage Engine Module
//!
//! The keyspace engine and the data structures backing its value groups.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Keyspace                             │
//! │                     (one RwLock)                            │
//! │  ┌──────────┐ ┌──────────────┐ ┌──────────┐ ┌────────────┐ │
//! │  │ tag map  │ │ strings      │ │ lists    │ │ sorted sets│ │
//! │  │ key →    │ │ HashMap      │ │ List     │ │ RbTree     │ │
//! │  │ group,   │ │              │ │ (VecDeque│ │ (score →   │ │
//! │  │ expiry   │ │              │ │  backed) │ │  members)  │ │
//! │  └──────────┘ └──────────────┘ └──────────┘ └────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ bulk_delete every 100ms
//!              ┌─────────────┴─────────────┐
//!              │        KeyExpirer         │
//!              │   (background tokio task) │
//!              └───────────────────────────┘
//! ```
//!
//! A key lives in the tag map plus exactly one group map; both sides of
//! that pair change together under the write lock. Expired keys are
//! reclaimed lazily on access and actively by the [`expiry::KeyExpirer`].

pub mod expiry;
pub mod keyspace;
pub mod list;
pub mod rbtree;

// Re-export commonly used types
pub use expiry::{KeyExpirer, EXPIRE_INTERVAL};
pub use keyspace::{
    from_unix_seconds, unix_seconds, Clock, Group, KeyResult, Keyspace, KeyspaceError,
    RecordValue, SnapshotRecord, SystemClock, Value,
};
pub use list::List;
pub use rbtree::RbTree;
