//! Error types and result definitions for the LLKV storage workspace.
//!
//! This crate provides the unified error type ([`Error`]) and result type alias ([`Result<T>`])
//! used throughout all LLKV crates. All operations that could fail return `Result<T>`, where
//! the error variant contains detailed information about what went wrong.
//!
//! # Error Philosophy
//!
//! LLKV uses a single error enum ([`Error`]) rather than crate-specific error types.
//!
//! This approach:
//! - Simplifies error handling across crate boundaries
//! - Allows errors to propagate naturally with `?` operator
//! - Provides clear error messages for end users
//! - Enables structured error matching for programmatic handling
//!
//! # Error Categories
//!
//! Errors are organized into several categories:
//!
//! - **I/O errors** ([`Error::Io`]): Disk operations, spill files
//! - **Data format errors** ([`Error::Arrow`]): Arrow chunk construction issues
//! - **Lookup failures** ([`Error::NotFound`]): Missing tablets, rowsets, blobs
//! - **User input errors** ([`Error::InvalidArgumentError`]): Bad parameters
//! - **Catalog errors** ([`Error::CatalogError`]): Metadata corruption or inconsistency
//! - **Cancellation** ([`Error::Cancelled`]): Job aborted or workers stopped
//! - **Resource limits** ([`Error::ResourceExceeded`]): Memory ceiling breached
//! - **Sequencing errors** ([`Error::InvalidState`]): APIs called out of order
//! - **Internal errors** ([`Error::Internal`]): Bugs or unexpected states

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
