//! Shared data models for the Vodforge backend.
//!
//! This crate provides Serde-serializable types for:
//! - Processing jobs and their queue lifecycle
//! - Media state as recorded by the metadata authority
//! - Status events pushed to subscribed clients

pub mod event;
pub mod job;
pub mod media;

// Re-export common types
pub use event::StatusEvent;
pub use job::{JobHandle, JobId, JobState, ProcessingJob, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
pub use media::{MediaId, MediaRecord, MediaState, StateVersion, StateWrite};
