//! AI/ML playground client - upload and chat session controllers
//!
//! (c) Softlandia 2025

pub mod api;
pub mod core;
pub mod infrastructure;
