//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and store access so route handlers
//! can stay focused on protocol translation.

pub mod assistant;
pub mod live_query;
pub mod mirror;
pub mod parking;
