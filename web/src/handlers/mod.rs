//! HTTP handlers for the analytics read API.

pub mod analytics;
pub mod health;
