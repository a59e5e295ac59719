//! Purple Core
//!
//! Core types shared by the purple-team tagging and reporting services.
//!
//! This crate contains:
//! - Domain types: runs, tag documents, detections, report jobs, lifecycle events
//! - DTOs: wire shapes of the emulation engine and the search-index store

pub mod domain;
pub mod dto;
