//! # Trainsync Testing Utils
//!
//! Shared testing utilities for the worker crates: recording mock
//! collaborators, task configuration builders and output directory fixtures.
//!
//! ```toml
//! [dev-dependencies]
//! trainsync-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
