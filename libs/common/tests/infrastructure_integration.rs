//! Integration tests for the infrastructure components
//!
//! These tests verify that PostgreSQL and Redis are configured and
//! reachable. They need live servers and are ignored by default; run them
//! with `cargo test -- --ignored` against a development stack.

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool},
};
use serde::{Deserialize, Serialize};
use sqlx::Row;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct PendingFlow {
    verifier: String,
    created_at: i64,
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis"]
async fn test_infrastructure_integration() -> Result<(), Box<dyn std::error::Error>> {
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    assert!(health_check(&pool).await?, "Database health check failed");

    let row = sqlx::query("SELECT 1 as result").fetch_one(&pool).await?;
    let result: i32 = row.get("result");
    assert_eq!(result, 1, "PostgreSQL simple query test failed");

    let redis_pool = RedisPool::new(&RedisConfig::from_env())?;
    assert!(
        redis_pool.health_check().await?,
        "Redis health check failed"
    );

    let flow = PendingFlow {
        verifier: "pkce-verifier".to_string(),
        created_at: 1_700_000_000,
    };
    redis_pool
        .set_json("integration_test_flow", &flow, 10)
        .await?;

    let restored: Option<PendingFlow> = redis_pool.take_json("integration_test_flow").await?;
    assert_eq!(restored, Some(flow), "Redis JSON round trip failed");

    let second: Option<PendingFlow> = redis_pool.take_json("integration_test_flow").await?;
    assert_eq!(second, None, "Consumed flow state must not be readable twice");

    Ok(())
}
