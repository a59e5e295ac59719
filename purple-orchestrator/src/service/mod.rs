//! Service layer
//!
//! Business logic on top of the repositories: the store resilience policy
//! (breaker, limiter, retries, fallback) and detection correlation.
//!
//! Shared state such as breakers is constructed once in `main` and
//! injected.

pub mod breaker;
pub mod correlator;
pub mod fallback;
pub mod tagging;

pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use correlator::{CorrelatorSettings, DetectionCorrelator};
pub use fallback::FileFallbackStore;
pub use tagging::{TagError, TagOutcome, TaggingClient, TaggingSettings};
