//! Public API: the manager builder and the query façade

pub mod builder;
pub mod facade;

pub use builder::SessionManagerBuilder;
pub use facade::{ApiError, ApiResult, PairingResult, SessionApi};
