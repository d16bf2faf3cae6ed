//! Shared infrastructure for the college finder access services
//!
//! This crate owns the pieces every service needs but no service should
//! configure on its own: the PostgreSQL pool, the Redis client used for
//! short-lived flow state, and the error types they report.
//!
//! ```rust,no_run
//! use common::database::{DatabaseConfig, init_pool, health_check};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let pool = init_pool(&config).await?;
//!     let is_healthy = health_check(&pool).await?;
//!     println!("Database health check: {}", is_healthy);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod database;
pub mod error;

pub use database::{DatabaseConfig, health_check, init_pool};
