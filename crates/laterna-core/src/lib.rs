//! Read-only streaming object model shared across the workspace.
//!
//! These types mirror the structure of a parsed manifest: a [`Manifest`]
//! contains Periods, a [`Period`] groups [`Adaptation`]s per media type, and
//! an Adaptation exposes its quality variants as [`Representation`]s. Only
//! the fields the adaptive-streaming logic reads are modeled here; parsing
//! lives elsewhere.

#![forbid(unsafe_code)]

mod manifest;
mod representation;

pub use manifest::{Adaptation, Manifest, MediaType, Period};
pub use representation::Representation;
