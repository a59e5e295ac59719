//! Repository layer
//!
//! Repositories are thin adapters over the HTTP clients. They expose the
//! narrow interfaces the services need without any business logic.
//!
//! All repositories are trait-based so services can be tested against
//! in-memory fakes.

mod runs;
mod store;

// Re-export traits
pub use runs::RunReader;
pub use store::DocumentStore;

// Re-export implementations
pub use runs::HttpRunReader;
pub use store::HttpDocumentStore;
