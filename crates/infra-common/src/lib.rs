//! # tenantlink-infra-common
//!
//! Shared infrastructure for the tenantlink crates:
//!
//! - [`logging`]: `tracing` subscriber setup and structured log contexts
//! - [`errors`]: the infra error type and component/operation error context

pub mod errors;
pub mod logging;

pub use errors::{Error, ErrorContext, ErrorExt, Result};
pub use logging::{setup_logging, try_setup_logging, LogContext, LoggingConfig};
