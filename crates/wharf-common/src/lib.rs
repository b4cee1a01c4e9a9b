//! Wharf Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the wharf workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace
//! members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Content-addressed key derivation
//! - **Logging**: Centralized tracing initialization
//!
//! # Example
//!
//! ```
//! use wharf_common::checksum::sha256_hex;
//!
//! let key = sha256_hex(b"https://example.com/page");
//! assert_eq!(key.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, WharfError};
