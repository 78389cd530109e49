//! Infra-level errors and error context

pub mod context;
pub mod types;

pub use context::{ErrorContext, ErrorExt};
pub use types::{Error, Result};
