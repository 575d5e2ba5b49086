//! Aggregated service status snapshots.

use serde::Serialize;
use std::fmt;

/// Top-level service lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Status of one subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemStatus {
    pub name: String,
    pub state: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Subsystem-specific details (stream stats for the camera).
    pub details: serde_json::Value,
}

/// Best-effort service snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    /// Seconds since the last successful start; 0 when not running.
    pub uptime_secs: u64,
    pub subsystems: Vec<SubsystemStatus>,
    pub audio_enabled: bool,
    pub button_enabled: bool,
    pub matter_enabled: bool,
    pub substream_enabled: bool,
}

impl ServiceStatus {
    pub fn subsystem(&self, name: &str) -> Option<&SubsystemStatus> {
        self.subsystems.iter().find(|s| s.name == name)
    }

    /// Single-line JSON, empty object if serialization fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Indented JSON for human consumption.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status() -> ServiceStatus {
        ServiceStatus {
            state: ServiceState::Running,
            uptime_secs: 12,
            subsystems: vec![SubsystemStatus {
                name: "camera".to_string(),
                state: "running".to_string(),
                running: true,
                fault: None,
                details: json!({ "running": true }),
            }],
            audio_enabled: false,
            button_enabled: true,
            matter_enabled: false,
            substream_enabled: false,
        }
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let value = serde_json::to_value(status()).unwrap();
        assert_eq!(value["state"], "running");
        assert_eq!(value["uptime_secs"], 12);
        assert_eq!(value["subsystems"][0]["name"], "camera");
        assert!(value["subsystems"][0].get("fault").is_none());
    }

    #[test]
    fn test_subsystem_lookup() {
        let status = status();
        assert!(status.subsystem("camera").is_some());
        assert!(status.subsystem("button").is_none());
    }

    #[test]
    fn test_to_json_is_single_line() {
        assert!(!status().to_json().contains('\n'));
        assert!(status().to_json_pretty().contains('\n'));
    }
}
