//! API handlers for the inventaria authentication service.

pub mod auth;
pub mod health;
