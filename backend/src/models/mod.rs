//! Domain models.

pub mod backup;
