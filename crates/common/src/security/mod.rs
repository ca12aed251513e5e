//! Audit sinks.
//!
//! `AuditLog` is the durable, hash-chained sink used in deployments;
//! `MemoryAuditSink` backs tests and embedders that forward entries elsewhere.

pub mod audit_log;
pub mod memory;

pub use audit_log::{AuditLog, AuditLogBuilder, AuditOptions, AuditRecord};
pub use memory::MemoryAuditSink;
