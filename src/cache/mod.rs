//! Normalized request cache.
//!
//! A keyed table of query results shared by every consumer of the API:
//! - one cache entry per (endpoint, arguments) pair, results deduplicated
//! - entries tagged with the entities they contain; mutations invalidate
//!   by tag and subscribed entries refetch automatically
//! - subscribers observe entries through watch channels and keep them
//!   alive by reference count

mod engine;
mod entry;
mod key;
mod subscription;
mod tag;

pub use engine::{CacheEngine, MutationSpec, QueryOptions, QuerySpec, TagsFn};
pub use entry::{QuerySnapshot, QueryStatus};
pub use key::CacheKey;
pub use subscription::{QueryState, QuerySubscription};
pub use tag::{Entity, Tag, TagId};
