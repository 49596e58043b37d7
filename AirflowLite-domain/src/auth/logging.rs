use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Types of authentication events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEventType {
    /// Credentials were checked for a protected request
    BasicAuth,
    /// The request carried no usable Authorization header
    MissingCredentials,
}

impl std::fmt::Display for AuthEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthEventType::BasicAuth => write!(f, "BASIC_AUTH"),
            AuthEventType::MissingCredentials => write!(f, "MISSING_CREDENTIALS"),
        }
    }
}

/// Authentication event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub event_type: AuthEventType,
    /// User name presented by the client, if any
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub details: Option<String>,
    /// Path of the protected resource
    pub resource: Option<String>,
    pub duration_ms: Option<u64>,
}

impl AuthEvent {
    pub fn new(event_type: AuthEventType, user_id: Option<&str>, success: bool) -> Self {
        Self {
            event_type,
            user_id: user_id.map(String::from),
            timestamp: Utc::now(),
            success,
            details: None,
            resource: None,
            duration_ms: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Log an authentication event
pub fn log_auth_event(event: AuthEvent) {
    let user = event.user_id.as_deref().unwrap_or("anonymous");
    let resource = event.resource.as_deref().unwrap_or("-");
    let details = event.details.as_deref().unwrap_or("");
    let duration_ms = event.duration_ms.unwrap_or(0);

    if event.success {
        info!(
            event_type = %event.event_type,
            user,
            resource,
            duration_ms,
            "AUTH-LOG [{}] [{}] [SUCCESS] [{}] {}",
            event.event_type,
            user,
            event.timestamp.to_rfc3339(),
            details
        );
    } else {
        warn!(
            event_type = %event.event_type,
            user,
            resource,
            duration_ms,
            "AUTH-LOG [{}] [{}] [FAILURE] [{}] {}",
            event.event_type,
            user,
            event.timestamp.to_rfc3339(),
            details
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_auth_event() {
        let event = AuthEvent::new(AuthEventType::BasicAuth, Some("admin"), true)
            .with_details("Credentials accepted")
            .with_resource("/dags/etl")
            .with_duration(3);

        assert_eq!(event.event_type, AuthEventType::BasicAuth);
        assert_eq!(event.user_id.as_deref(), Some("admin"));
        assert!(event.success);
        assert_eq!(event.resource.as_deref(), Some("/dags/etl"));
        assert_eq!(event.duration_ms, Some(3));
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(AuthEventType::BasicAuth.to_string(), "BASIC_AUTH");
        assert_eq!(
            AuthEventType::MissingCredentials.to_string(),
            "MISSING_CREDENTIALS"
        );
    }
}
