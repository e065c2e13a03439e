//! Session and credential management.
//!
//! [`SessionStore`] is the state machine gating which queries may run;
//! [`storage`] provides the durable key-value backends it persists to.

pub mod storage;
mod store;

pub use storage::{CredentialStorage, FileStorage, MemoryStorage};
pub use store::{Session, SessionEvent, SessionStore};
