//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub uptime_secs: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new(uptime_secs: u64) -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            uptime_secs,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    pub fn is_serving(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
    gateway_configured: bool,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, gateway_configured: bool) -> Self {
        Self {
            db_pool,
            gateway_configured,
            started_at: Instant::now(),
        }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new(self.started_at.elapsed().as_secs());
        let mut any_down = false;
        let mut any_warning = false;

        // Check database health
        match &self.db_pool {
            Some(pool) => match timeout(Duration::from_secs(5), check_database_health(pool)).await {
                Ok(db_result) => match db_result {
                    Ok(response_time) => {
                        health_status.checks.insert(
                            "database".to_string(),
                            ComponentHealth::up(Some(response_time)),
                        );
                        info!("Database health check: OK ({}ms)", response_time);
                    }
                    Err(e) => {
                        any_down = true;
                        health_status.checks.insert(
                            "database".to_string(),
                            ComponentHealth::down(Some(e.to_string())),
                        );
                        error!("Database health check failed: {}", e);
                    }
                },
                Err(_) => {
                    any_down = true;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some("Timeout".to_string())),
                    );
                    error!("Database health check timed out");
                }
            },
            None => {
                any_warning = true;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::warning(
                        None,
                        Some("running on the in-memory store; state is not durable".to_string()),
                    ),
                );
            }
        }

        // Payment gateway has no ping endpoint; report whether card
        // verification is configured at all.
        if self.gateway_configured {
            health_status
                .checks
                .insert("payment_gateway".to_string(), ComponentHealth::up(None));
        } else {
            any_warning = true;
            health_status.checks.insert(
                "payment_gateway".to_string(),
                ComponentHealth::warning(
                    None,
                    Some("gateway credentials not set; card purchases disabled".to_string()),
                ),
            );
        }

        // Set overall status
        health_status.status = if any_down {
            HealthState::Unhealthy
        } else if any_warning {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

// Add a function to check database health
pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    // Try to perform a simple query to check database connectivity
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_creation() {
        let health_status = HealthStatus::new(42);
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert_eq!(health_status.uptime_secs, 42);
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
        assert_eq!(warning_health.details, Some("Slow response".to_string()));
    }

    #[tokio::test]
    async fn memory_profile_reports_degraded_but_serving() {
        let checker = HealthChecker::new(None, false);

        let status = checker.check_health().await;

        assert!(matches!(status.status, HealthState::Degraded));
        assert!(!status.is_healthy());
        assert!(status.is_serving());
        assert!(status.checks.contains_key("database"));
        assert!(status.checks.contains_key("payment_gateway"));
    }
}
