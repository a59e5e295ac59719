//! Core domain types
//!
//! These types describe what the pipeline reads from the emulation engine
//! (runs and their steps), what it writes to the search-index store (tag
//! documents) and what it tracks locally (report jobs, detections).

pub mod detection;
pub mod event;
pub mod report;
pub mod run;
pub mod tag;
