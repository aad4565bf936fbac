//! Media metadata authority.
//!
//! This crate provides:
//! - The [`MetadataAuthority`] seam over the catalog store
//! - Versioned, state-machine-checked writes (stale reports from dead
//!   leases are rejected, terminal records are immutable)
//! - The stuck-media index read by the reconciliation scan
//! - In-memory and Redis-backed implementations

pub mod authority;
pub mod error;
pub mod redis_catalog;

pub use authority::{MemoryCatalog, MetadataAuthority};
pub use error::{CatalogError, CatalogResult};
pub use redis_catalog::{RedisCatalog, RedisCatalogConfig};
