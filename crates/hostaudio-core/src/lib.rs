//! # hostaudio-core
//!
//! Core types, traits, and error handling shared by the hostaudio output backends.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
