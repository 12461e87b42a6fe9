//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared,
//! clonable resources the handlers need.

use crate::runs::RunRegistry;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub runs: RunRegistry,
}
