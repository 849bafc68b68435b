//! services/api/src/adapters/mod.rs
//!
//! Declares the adapter modules that implement the core's ports against
//! concrete infrastructure.

pub mod auth;
pub mod db;
pub mod rate;
