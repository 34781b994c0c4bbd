//! Business logic services.

pub mod audit_service;
pub mod auth_service;
pub mod backup_service;
pub mod dump_tool;
pub mod entity_store;
pub mod metrics_service;
pub mod notification_service;
pub mod scheduler_service;
