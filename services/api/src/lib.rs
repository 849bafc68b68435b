//! services/api/src/lib.rs
//!
//! The library crate for the API service: configuration, error types, the
//! database adapters, and the web layer (REST, WebSocket signaling, and the
//! background sweeper).

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
