//! # conveyor-db
//!
//! PostgreSQL durable store for the conveyor job engine.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobStore`], the `DurableStore` implementation that mirrors live job
//!   records and archives dead-lettered jobs
//! - Schema bootstrap for deployments that don't manage DDL externally
//!
//! ## Example
//!
//! ```rust,ignore
//! use conveyor_db::PgJobStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgJobStore::connect("postgres://localhost/conveyor").await?;
//!     store.ensure_schema().await?;
//!     // hand the store to EngineBuilder::with_store(...)
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod pool;

// Re-export core types
pub use conveyor_core::*;

pub use jobs::PgJobStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
