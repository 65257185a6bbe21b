//! Health reporting derived from breaker and queue state.
//!
//! - A CLOSED breaker is healthy; HALF_OPEN and OPEN are degraded, except an
//!   OPEN critical breaker (the database by default), which is unhealthy.
//! - A retry queue above 80% of its capacity is degraded.

use crate::circuit_breaker::CircuitBreakerStats;
use crate::registry::CircuitBreakerRegistry;
use crate::retry_queue::RetryQueueStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use turnstile_core::CircuitState;
use turnstile_core::environment::Clock;

/// Queue fill ratio above which the queue reports degraded.
pub const QUEUE_DEGRADED_RATIO: f64 = 0.8;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but failing fast or backing up
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Extra details, e.g. queue depth
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: BTreeMap::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Aggregated health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// When the report was generated
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Create a new health report from checks, stamped with `clock`.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>, clock: &dyn Clock) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: clock.now(),
        }
    }

    /// Check if overall system is unhealthy
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }
}

/// Health of one breaker.
#[must_use]
pub fn breaker_check(stats: &CircuitBreakerStats, critical: bool) -> HealthCheck {
    let component = format!("circuit_breaker:{}", stats.name);
    let check = match stats.state {
        CircuitState::Closed => HealthCheck::healthy(component),
        CircuitState::HalfOpen => HealthCheck::degraded(component, "probing for recovery"),
        CircuitState::Open if critical => HealthCheck::unhealthy(component, "circuit open"),
        CircuitState::Open => HealthCheck::degraded(component, "circuit open, failing fast"),
    };

    let check = check.with_metadata("state", stats.state);
    match stats.time_until_retry_ms {
        Some(ms) => check.with_metadata("time_until_retry_ms", ms),
        None => check,
    }
}

/// Health of every breaker in the registry, sorted by name.
#[must_use]
pub fn registry_checks(registry: &CircuitBreakerRegistry) -> Vec<HealthCheck> {
    registry
        .breakers()
        .map(|breaker| breaker_check(&breaker.stats(), breaker.config().critical))
        .collect()
}

/// Health of a retry queue.
#[must_use]
pub fn queue_check(stats: &RetryQueueStats) -> HealthCheck {
    let component = format!("retry_queue:{}", stats.name);

    #[allow(clippy::cast_precision_loss)]
    let fill = if stats.capacity == 0 {
        0.0
    } else {
        stats.queued_count as f64 / stats.capacity as f64
    };

    let check = if fill > QUEUE_DEGRADED_RATIO {
        HealthCheck::degraded(
            component,
            format!("queue at {}/{} messages", stats.queued_count, stats.capacity),
        )
    } else {
        HealthCheck::healthy(component)
    };

    check
        .with_metadata("queued", stats.queued_count)
        .with_metadata("dead_letters", stats.dead_letter_count)
}
