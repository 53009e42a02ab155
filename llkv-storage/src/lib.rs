//! Blob storage abstraction for the LLKV tablet store.
//!
//! Everything the tablet layer persists (segment files, column-group parts
//! produced by a vertical writer, transaction logs and the catalog) lives as an
//! opaque blob addressed by a [`types::PhysicalKey`]. The [`pager::Pager`] trait
//! is the only contract higher layers depend on; [`pager::MemPager`] backs tests
//! and [`pager::InstrumentedPager`] wraps any pager with I/O counters.

pub mod constants;
pub mod pager;
pub mod types;

pub use llkv_result::{Error, Result};
