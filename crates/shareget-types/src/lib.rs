//! Shared types for shareget
//!
//! This crate contains the data structures shared between the core
//! orchestrator and the CLI: endpoints, settings, run events and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Endpoint Types
// ============================================================================

/// Base address of a remote share service.
///
/// Always ends with `/`, so the manifest and file URLs are formed by plain
/// concatenation (`<endpoint>info`, `<endpoint><index>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    /// Parse a configured base address.
    ///
    /// Returns `None` for blank input, unparseable URLs and schemes other
    /// than `http`/`https`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let parsed = url::Url::parse(trimmed).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return None;
        }

        let mut base = trimmed.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Some(Self(base))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL of the manifest record
    pub fn info_url(&self) -> String {
        format!("{}info", self.0)
    }

    /// URL of the file at a zero-based index
    pub fn file_url(&self, index: u32) -> String {
        format!("{}{}", self.0, index)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Endpoint::parse(&raw).ok_or_else(|| format!("invalid endpoint: {:?}", raw))
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Candidate share endpoints, tried concurrently on every run
    pub endpoints: Vec<String>,
    pub default_download_path: PathBuf,
    /// Seconds a run may spend discovering a manifest before it is aborted
    pub idle_abort_secs: u64,
    /// Interval between progress ticks in milliseconds
    pub tick_interval_ms: u64,
    /// Retries allowed per file after the first attempt
    pub max_retries: u32,
    /// Manifests listing more files than this are rejected
    pub max_files: u32,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            default_download_path: dirs::download_dir()
                .map(|p| p.join("shareget"))
                .unwrap_or_else(|| PathBuf::from(".")),
            idle_abort_secs: 4,
            tick_interval_ms: 1000,
            max_retries: 4,
            max_files: 10_000,
            user_agent: format!("shareget/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: 10,
        }
    }
}

// ============================================================================
// Run Types
// ============================================================================

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Polling endpoints for a manifest
    Discovering,
    /// A manifest was accepted and files are being fetched
    Fetching,
    Completed,
    /// Every file reached a terminal state but some were lost
    Incomplete,
    TimedOut,
    Cancelled,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Discovering | RunStatus::Fetching)
    }
}

/// Point-in-time view of the current run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: Uuid,
    pub directory: PathBuf,
    pub status: RunStatus,
    pub endpoint: Option<Endpoint>,
    pub expected: Option<u32>,
    pub received: u32,
    pub abandoned: u32,
    pub failed: u32,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the core while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        directory: PathBuf,
        endpoints: Vec<Endpoint>,
    },
    ManifestRejected {
        endpoint: Endpoint,
        reason: String,
    },
    ManifestAccepted {
        endpoint: Endpoint,
        expected: u32,
    },
    FetchRetrying {
        index: u32,
        attempt: u32,
    },
    FileAbandoned {
        index: u32,
        attempts: u32,
    },
    FileFailed {
        index: u32,
        error: String,
    },
    FileSaved {
        index: u32,
        filename: String,
        path: PathBuf,
        bytes: u64,
    },
    Progress {
        received: u32,
        expected: u32,
    },
    Tick {
        elapsed_secs: u64,
    },
    Completed {
        run_id: Uuid,
        directory: PathBuf,
        received: u32,
    },
    Incomplete {
        run_id: Uuid,
        directory: PathBuf,
        received: u32,
        expected: u32,
    },
    TimedOut {
        run_id: Uuid,
    },
    Cancelled {
        run_id: Uuid,
    },
}

impl RunEvent {
    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Completed { .. }
                | RunEvent::Incomplete { .. }
                | RunEvent::TimedOut { .. }
                | RunEvent::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse_normalizes_trailing_slash() {
        let endpoint = Endpoint::parse(" http://192.168.1.20:8080 ").unwrap();
        assert_eq!(endpoint.as_str(), "http://192.168.1.20:8080/");
        assert_eq!(endpoint.info_url(), "http://192.168.1.20:8080/info");
        assert_eq!(endpoint.file_url(3), "http://192.168.1.20:8080/3");
    }

    #[test]
    fn test_endpoint_parse_keeps_path_prefix() {
        let endpoint = Endpoint::parse("http://h/share/").unwrap();
        assert_eq!(endpoint.info_url(), "http://h/share/info");
        assert_eq!(endpoint.file_url(0), "http://h/share/0");
    }

    #[test]
    fn test_endpoint_parse_rejects_garbage() {
        assert!(Endpoint::parse("").is_none());
        assert!(Endpoint::parse("   ").is_none());
        assert!(Endpoint::parse("not a url").is_none());
        assert!(Endpoint::parse("ftp://h/").is_none());
    }

    #[test]
    fn test_settings_fill_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{"endpoints": ["http://h/"]}"#).unwrap();
        assert_eq!(settings.endpoints, vec!["http://h/".to_string()]);
        assert_eq!(settings.idle_abort_secs, 4);
        assert_eq!(settings.tick_interval_ms, 1000);
        assert_eq!(settings.max_retries, 4);
        assert_eq!(settings.max_files, 10_000);
    }

    #[test]
    fn test_endpoint_deserialize_goes_through_parse() {
        let endpoint: Endpoint = serde_json::from_str(r#"" http://h:8080/share ""#).unwrap();
        assert_eq!(endpoint.as_str(), "http://h:8080/share/");
        assert_eq!(endpoint.info_url(), "http://h:8080/share/info");

        assert!(serde_json::from_str::<Endpoint>(r#""ftp://h/""#).is_err());
        assert!(serde_json::from_str::<Endpoint>(r#""""#).is_err());

        assert_eq!(
            serde_json::to_value(&endpoint).unwrap(),
            serde_json::json!("http://h:8080/share/")
        );
    }

    #[test]
    fn test_event_wire_shape() {
        let event = RunEvent::Progress {
            received: 1,
            expected: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Progress");
        assert_eq!(json["payload"]["received"], 1);
        assert!(!event.is_terminal());
        assert!(RunEvent::TimedOut { run_id: Uuid::nil() }.is_terminal());
    }
}
