//! Figurine Forge
//!
//! This library provides the core functionality for the figurine-forge
//! service, which turns a user-submitted photograph into a printable 3D
//! figurine via AI image classification, credit-metered generation through
//! an external image-to-3D provider, and refund-on-failure accounting.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
