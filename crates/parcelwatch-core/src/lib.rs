//! Shared types, configuration and errors for the parcelwatch workspace.

pub mod config;
pub mod error;
pub mod notification;
pub mod types;

pub use error::{ParcelwatchError, Result};
