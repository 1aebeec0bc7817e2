//! # bleadvert-server
//!
//! HTTP server library for bleadvert, the BLE beacon proximity rewards system.
//!
//! Provides the REST handlers, shared application state and logging setup used
//! by the `bleadvert-server` binary and by integration tests.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
