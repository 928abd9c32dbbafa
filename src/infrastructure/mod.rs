//! Infrastructure Layer
//!
//! Implementations for external systems:
//! - Database pool, migrations and repositories (PostgreSQL)
//! - Backplane and shared presence counters (Redis)
//! - Prometheus metrics

pub mod backplane;
pub mod database;
pub mod metrics;
pub mod repositories;
