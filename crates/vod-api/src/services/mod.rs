//! Background services.

pub mod reconciler;

pub use reconciler::ReconciliationScanner;
