//! Levelboard Common - Shared types and utilities
//!
//! This crate provides identifiers, error definitions, and configuration
//! used across all Levelboard components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
