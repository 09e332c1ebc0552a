//! Core types and configuration for the bar-replay system.
//!
//! This crate provides shared types used across all other crates:
//! - Candle data and validated candle series
//! - Position and order sides
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
