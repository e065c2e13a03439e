//! Client-side data synchronization for a storefront API.
//!
//! The crate keeps a remote API and local consumers in sync through two
//! cooperating pieces:
//!
//! - a normalized request cache ([`cache::CacheEngine`]): one entry per
//!   (endpoint, arguments) pair, deduplicated fetches, tag-based
//!   invalidation, and mutation-triggered refetch, so consumers never
//!   orchestrate manual refreshes;
//! - a session store ([`session::SessionStore`]): durable credentials,
//!   an explicit restoring-to-settled lifecycle, and forced logout on
//!   authorization failures, which synchronously purges the cache.
//!
//! [`api::StoreClient`] ties them together behind typed query and mutation
//! methods:
//!
//! ```no_run
//! use std::sync::Arc;
//! use shopsync::api::StoreClient;
//! use shopsync::config::Config;
//! use shopsync::session::FileStorage;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let storage = FileStorage::open().ok_or("no data dir")?;
//! let client = StoreClient::new(&config, Arc::new(storage))?;
//! client.restore_session();
//!
//! let mut products = client.products(Default::default());
//! while products.changed().await {
//!   if let Some(list) = products.state().data {
//!     println!("{} products", list.len());
//!   }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;
