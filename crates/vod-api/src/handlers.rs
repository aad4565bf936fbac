//! Request handlers.

pub mod health;
pub mod jobs;
pub mod media;
pub mod uploads;

pub use health::*;
pub use jobs::*;
pub use media::*;
pub use uploads::*;
