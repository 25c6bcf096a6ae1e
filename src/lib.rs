//! Read-through result caching with invalidate-on-write for service handlers.
//!
//! [`cache`] holds the reusable layer; [`application::items`] shows it wired
//! into a service with two TTL tiers, and [`infra::http`] serves that service.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
