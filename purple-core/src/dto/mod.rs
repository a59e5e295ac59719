//! Data Transfer Objects for external systems
//!
//! Wire representations of the emulation engine's operation API and the
//! search-index store's responses. Conversions into domain types live next
//! to the DTOs.

pub mod engine;
pub mod search;
