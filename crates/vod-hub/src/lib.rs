//! Status propagation: per-media fan-out of processing events.
//!
//! Workers publish [`StatusEvent`]s as they move jobs through the
//! pipeline; API nodes subscribe clients to the media items they care
//! about. Delivery is best-effort by design.
//!
//! [`StatusEvent`]: vod_models::StatusEvent

pub mod channel;
pub mod error;
pub mod hub;

pub use channel::StatusChannel;
pub use error::{HubError, HubResult};
pub use hub::StatusHub;
