//! Storefront API surface: endpoint definitions, payload types, and the
//! typed client facade.

mod client;
mod endpoints;
pub mod types;

pub use client::StoreClient;
