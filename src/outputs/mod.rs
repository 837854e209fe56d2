//! Output generation: the Markdown report and the JSON run artifacts.
//!
//! # Submodules
//!
//! - [`report`]: renders enriched records into the Markdown digest
//! - [`json`]: writes and reads the per-run JSON files

pub mod json;
pub mod report;
