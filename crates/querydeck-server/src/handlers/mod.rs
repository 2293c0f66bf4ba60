//! HTTP handlers for the QueryDeck API.
//!
//! This module contains all route handlers organized by domain.

pub mod expressions;
pub mod health;
pub mod run;
pub mod sources;

pub use health::{api_health, health_check};
