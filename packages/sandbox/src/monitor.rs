// ABOUTME: Crash detection for deployed programs and recovery bookkeeping
// ABOUTME: Classifies sandbox state, extracts diagnostics from logs and guards concurrent recovery

use crate::deploy::DeployOutcome;
use crate::probe::{HealthProber, ProbeOutcome};
use crate::registry::{Detached, SandboxRegistry};
use crate::settings::OrchestratorSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Matched diagnostic lines kept for a recovery report
pub const MAX_DIAGNOSTIC_LINES: usize = 15;
/// Raw tail kept when nothing looks like an error
pub const FALLBACK_TAIL_LINES: usize = 10;

const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "exception",
    "failed",
    "cannot find",
    "unhandled",
    "uncaught",
    "enoent",
    "eaddrinuse",
    "econnrefused",
    "typeerror",
    "referenceerror",
    "syntaxerror",
];

static STACK_FRAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+at\s").expect("valid regex"));

static STREAM_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(stdout|stderr|system)\] ").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Running,
    Stopped,
    Error,
    /// Sandbox alive but nothing answers on the app port
    PortDown,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxState::Running => write!(f, "running"),
            SandboxState::Stopped => write!(f, "stopped"),
            SandboxState::Error => write!(f, "error"),
            SandboxState::PortDown => write!(f, "port_down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: SandboxState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusReport {
    pub fn stopped() -> Self {
        Self {
            state: SandboxState::Stopped,
            endpoint: None,
            external_id: None,
            detail: None,
        }
    }
}

/// Classify the project's sandbox.
///
/// `stopped` when no handle resolves, `error` when the no-op command fails,
/// otherwise `running` or `port_down` depending on the health probe.
pub async fn check_status(
    registry: &SandboxRegistry,
    prober: &HealthProber,
    settings: &OrchestratorSettings,
    project_id: &str,
    hint: Option<&str>,
) -> StatusReport {
    classify(registry, prober, settings, project_id, hint).await.0
}

/// Like [`check_status`], also returning why a `stopped` project has no handle
pub(crate) async fn classify(
    registry: &SandboxRegistry,
    prober: &HealthProber,
    settings: &OrchestratorSettings,
    project_id: &str,
    hint: Option<&str>,
) -> (StatusReport, Option<Detached>) {
    let handle = match registry.attach(project_id, hint).await {
        Ok(handle) => handle,
        Err(Detached::Unreachable(e)) => {
            let report = StatusReport {
                detail: Some(format!("provider unreachable: {}", e)),
                ..StatusReport::stopped()
            };
            return (report, Some(Detached::Unreachable(e)));
        }
        Err(reason) => return (StatusReport::stopped(), Some(reason)),
    };

    let mut report = StatusReport {
        state: SandboxState::Error,
        endpoint: handle.endpoint.clone(),
        external_id: Some(handle.external_id.clone()),
        detail: None,
    };

    if !handle.is_alive(settings.liveness_timeout).await {
        report.detail = Some("liveness command failed".to_string());
        return (report, None);
    }

    let endpoint = match handle.endpoint.as_deref() {
        Some(endpoint) => endpoint,
        None => {
            report.state = SandboxState::PortDown;
            report.detail = Some("sandbox has no public endpoint".to_string());
            return (report, None);
        }
    };

    let outcome = prober.probe(endpoint, settings.status_probe_timeout).await;
    debug!("Status probe for {}: {:?}", project_id, outcome);
    match outcome {
        ProbeOutcome::Responding(_) => report.state = SandboxState::Running,
        ProbeOutcome::BadStatus(code) => {
            report.state = SandboxState::PortDown;
            report.detail = Some(format!("health route answered {}", code));
        }
        ProbeOutcome::Timeout => {
            report.state = SandboxState::PortDown;
            report.detail = Some("health probe timed out".to_string());
        }
        ProbeOutcome::Unreachable(e) => {
            report.state = SandboxState::PortDown;
            report.detail = Some(e);
        }
    }
    (report, None)
}

fn looks_like_diagnostic(line: &str) -> bool {
    let body = STREAM_TAG.replace(line, "");
    if STACK_FRAME.is_match(&body) {
        return true;
    }
    let lower = body.to_lowercase();
    ERROR_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Pick the log lines worth showing for a crash: the first matching
/// error-like lines, or the raw tail when none match.
pub fn extract_diagnostics(lines: &[String]) -> Vec<String> {
    let matched: Vec<String> = lines
        .iter()
        .filter(|line| looks_like_diagnostic(line))
        .take(MAX_DIAGNOSTIC_LINES)
        .cloned()
        .collect();

    if !matched.is_empty() {
        return matched;
    }

    let start = lines.len().saturating_sub(FALLBACK_TAIL_LINES);
    lines[start..].to_vec()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// False when the sandbox was not in `port_down` and nothing was done
    pub attempted: bool,
    pub state: SandboxState,
    pub diagnostics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DeployOutcome>,
}

/// Per-project in-flight set so a project is recovered by one caller at a time
#[derive(Clone, Default)]
pub struct RecoveryGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RecoveryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the project, or `None` if a recovery is already running
    pub fn try_begin(&self, project_id: &str) -> Option<RecoveryTicket> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(project_id.to_string()) {
            return None;
        }
        Some(RecoveryTicket {
            in_flight: self.in_flight.clone(),
            project_id: project_id.to_string(),
        })
    }

    pub fn is_recovering(&self, project_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(project_id)
    }
}

/// Releases the project's claim when dropped
pub struct RecoveryTicket {
    in_flight: Arc<Mutex<HashSet<String>>>,
    project_id: String,
}

impl Drop for RecoveryTicket {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.project_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_diagnostics_capped_at_first_matches() {
        let lines: Vec<String> = (0..20)
            .map(|i| format!("[stderr] TypeError: boom {}", i))
            .collect();

        let diagnostics = extract_diagnostics(&lines);
        assert_eq!(diagnostics.len(), MAX_DIAGNOSTIC_LINES);
        assert_eq!(diagnostics[0], "[stderr] TypeError: boom 0");
        assert_eq!(diagnostics[14], "[stderr] TypeError: boom 14");
    }

    #[test]
    fn test_diagnostics_fall_back_to_tail() {
        let lines: Vec<String> = (0..25).map(|i| format!("[stdout] tick {}", i)).collect();

        let diagnostics = extract_diagnostics(&lines);
        assert_eq!(diagnostics.len(), FALLBACK_TAIL_LINES);
        assert_eq!(diagnostics[0], "[stdout] tick 15");
        assert_eq!(diagnostics[9], "[stdout] tick 24");
    }

    #[test]
    fn test_stack_frames_and_keywords() {
        let lines = vec![
            "[stdout] listening on port 3000".to_string(),
            "[stderr] node:internal/process: Uncaught exception".to_string(),
            "[stderr]     at Object.<anonymous> (/app/server.mjs:12:5)".to_string(),
            "[stdout] all good".to_string(),
            "[stderr] Error: listen EADDRINUSE: address already in use".to_string(),
            "[stdout] data at rest".to_string(),
        ];

        assert_eq!(
            extract_diagnostics(&lines),
            vec![
                "[stderr] node:internal/process: Uncaught exception",
                "[stderr]     at Object.<anonymous> (/app/server.mjs:12:5)",
                "[stderr] Error: listen EADDRINUSE: address already in use",
            ]
        );
    }

    #[test]
    fn test_empty_log_has_no_diagnostics() {
        assert!(extract_diagnostics(&[]).is_empty());
    }

    #[test]
    fn test_recovery_guard_is_exclusive_per_project() {
        let guard = RecoveryGuard::new();

        let ticket = guard.try_begin("p1").unwrap();
        assert!(guard.try_begin("p1").is_none());
        assert!(guard.try_begin("p2").is_some());
        assert!(guard.is_recovering("p1"));

        drop(ticket);
        assert!(!guard.is_recovering("p1"));
        assert!(guard.try_begin("p1").is_some());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SandboxState::PortDown).unwrap(),
            "\"port_down\""
        );
        assert_eq!(SandboxState::PortDown.to_string(), "port_down");
    }
}
