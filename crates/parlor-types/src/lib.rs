//! Shared wire and domain types for the Parlor session core.
//!
//! Everything that crosses a crate boundary or the network lives here so that
//! the auth and chat crates never depend on each other's internals.

pub mod api;
pub mod events;
pub mod models;
