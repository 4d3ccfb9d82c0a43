use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Health Reporting
// ============================================================================
//
// Components that talk to the outside world (identity provider, remote
// customer API) describe themselves with a `ComponentHealth`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Unhealthy(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    #[serde(flatten)]
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Worst status across all components; healthy when there are none
pub fn overall_status(components: &[ComponentHealth]) -> HealthStatus {
    components
        .iter()
        .map(|c| &c.status)
        .max_by_key(|status| status.severity())
        .cloned()
        .unwrap_or(HealthStatus::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_is_worst() {
        let components = vec![
            ComponentHealth::new("auth", HealthStatus::Healthy),
            ComponentHealth::new("customer-api", HealthStatus::Degraded("half open".into())),
        ];
        assert_eq!(overall_status(&components), HealthStatus::Degraded("half open".into()));
        assert!(overall_status(&[]).is_healthy());
    }

    #[test]
    fn test_component_health_serializes_flat() {
        let health = ComponentHealth::new("auth", HealthStatus::Unhealthy("logged out".into()))
            .with_details("state=Unauthenticated");
        let json = serde_json::to_value(&health).unwrap();

        assert_eq!(json["name"], "auth");
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["reason"], "logged out");
        assert_eq!(json["details"], "state=Unauthenticated");
    }
}
