//! Application initialization and resource setup.
//!
//! This module provides functions to initialize the shared resources a
//! run needs: the logger and the HTTP clients probes go out through.
//!
//! All initialization functions return proper error types for error handling.

mod client;
mod logger;

pub use client::{init_client, init_cookie_client};
pub use logger::init_logger_with;
