//! PostgreSQL persistence for the seclave access-approval workflow.
//!
//! This crate provides the database row models and query methods for
//! approval policies, access-approval requests, and reviews, along with
//! connection pooling and embedded migrations.
//!
//! Row models are deliberately thin: each struct maps one table and
//! exposes explicit `sqlx` query methods. Business rules live in
//! `seclave-approval`, which drives these models through its ledger and
//! policy-store adapters.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::DbPool;
