//! Session Manager
//!
//! Owns the session table, drives every session through its lifecycle,
//! triggers reconnection and publishes status. See [`SessionManager`].

mod coordinator;
mod entry;
mod event_handler;
mod registry;
mod session_ops;

pub use coordinator::SessionManager;
