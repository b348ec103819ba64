//! Core service library for the Pulseboard dashboard backend.
//!
//! This crate implements the stale-while-revalidate report cache that sits
//! between the HTTP layer and the expensive report builders, together with
//! the background refresh orchestration that keeps cached reports warm
//! without ever duplicating work for a hot key.

pub mod caching;
pub mod config;
pub mod kvstore;
pub mod logging;
pub mod service;
pub mod types;
