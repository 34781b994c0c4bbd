//! Calendar Backend - Backup Library
//!
//! Database snapshots, verification, restore and scheduled backups for the
//! calendar service.

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
