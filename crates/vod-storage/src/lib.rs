//! S3-compatible object storage.
//!
//! Raw uploads and produced renditions are transferred with presigned
//! URLs so media bytes never pass through the API.

pub mod client;
pub mod error;

pub use client::{rendition_key, source_key, ObjectStore, ObjectStoreConfig};
pub use error::{StorageError, StorageResult};
