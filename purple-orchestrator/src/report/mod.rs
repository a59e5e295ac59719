//! Report generation
//!
//! - `renderer`: run + detections to a document model
//! - `layout`: document model to fixed-height pages
//! - `pdf`: pages to PDF bytes
//! - `coordinator`: job registry, worker pool and timeouts

pub mod coordinator;
pub mod layout;
pub mod pdf;
pub mod renderer;

pub use coordinator::{ReportCoordinator, ReportError, ReportSettings};
pub use pdf::PdfRenderer;
