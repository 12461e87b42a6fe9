//! Rabbit Hole API Library Crate
//!
//! This library contains the web service around the rabbit hole walk:
//! configuration, provider wiring, the run registry with its narration live
//! channel, API handlers, and routing. The binaries are thin wrappers around
//! this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod router;
pub mod runs;
pub mod state;
