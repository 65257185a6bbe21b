//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by concern.

pub mod admin;
pub mod health;

// Re-export common handler utilities
pub use health::{health_check, readiness};
