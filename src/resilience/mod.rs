//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Background export:
//!     → retries.rs (bounded attempts, exponential delay + jitter between them)
//! ```

pub mod retries;
