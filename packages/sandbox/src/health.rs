// ABOUTME: Periodic health watching for projects with a persisted sandbox
// ABOUTME: Runs bulk status on an interval and triggers recovery for crashed programs

use crate::error::OrchestratorError;
use crate::monitor::SandboxState;
use crate::orchestrator::Orchestrator;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time;
use tracing::{error, info, warn};

/// Checks kept per project
const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub project_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub state: SandboxState,
    pub endpoint: Option<String>,
    pub recovery_attempted: bool,
    pub message: Option<String>,
}

/// Background task that polls every tracked project
pub struct HealthWatcher {
    orchestrator: Arc<Orchestrator>,
    checks: Arc<RwLock<HashMap<String, Vec<HealthCheck>>>>,
    running: Arc<RwLock<bool>>,
    interval: Duration,
    auto_recover: bool,
}

impl HealthWatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let interval = orchestrator.settings().health_interval;
        let auto_recover = orchestrator.settings().auto_recover;
        Self {
            orchestrator,
            checks: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(false)),
            interval,
            auto_recover,
        }
    }

    /// Start the watch loop; a second call while running is a no-op
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let orchestrator = self.orchestrator.clone();
        let checks = self.checks.clone();
        let running_flag = self.running.clone();
        let interval = self.interval;
        let auto_recover = self.auto_recover;

        tokio::spawn(async move {
            info!(
                "Health watcher started (interval {:?}, auto-recover {})",
                interval, auto_recover
            );

            loop {
                if !*running_flag.read().await {
                    info!("Health watcher stopped");
                    break;
                }

                Self::run_checks(&orchestrator, &checks, auto_recover).await;

                time::sleep(interval).await;
            }
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run one round of checks immediately
    pub async fn check_now(&self) -> Vec<HealthCheck> {
        Self::run_checks(&self.orchestrator, &self.checks, self.auto_recover).await
    }

    async fn run_checks(
        orchestrator: &Orchestrator,
        checks: &RwLock<HashMap<String, Vec<HealthCheck>>>,
        auto_recover: bool,
    ) -> Vec<HealthCheck> {
        let projects = match orchestrator.tracked_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                error!("Failed to list projects with sandboxes: {}", e);
                return Vec::new();
            }
        };
        if projects.is_empty() {
            return Vec::new();
        }

        let reports = orchestrator.status_bulk(&projects).await;
        let mut round: Vec<HealthCheck> = reports
            .into_iter()
            .map(|(project_id, report)| HealthCheck {
                project_id,
                timestamp: Utc::now(),
                state: report.state,
                endpoint: report.endpoint,
                recovery_attempted: false,
                message: report.detail,
            })
            .collect();

        if auto_recover {
            let crashed: Vec<String> = round
                .iter()
                .filter(|check| check.state == SandboxState::PortDown)
                .map(|check| check.project_id.clone())
                .collect();

            let mut outcomes: HashMap<String, String> = stream::iter(crashed)
                .map(|project_id| async move {
                    let message = Self::recover_one(orchestrator, &project_id).await;
                    (project_id, message)
                })
                .buffer_unordered(orchestrator.settings().status_concurrency.max(1))
                .collect()
                .await;

            for check in &mut round {
                if let Some(message) = outcomes.remove(&check.project_id) {
                    check.recovery_attempted = true;
                    check.message = Some(message);
                }
            }
        }

        let mut checks = checks.write().await;
        for check in &round {
            let history = checks.entry(check.project_id.clone()).or_default();
            history.push(check.clone());
            if history.len() > MAX_HISTORY {
                let excess = history.len() - MAX_HISTORY;
                history.drain(..excess);
            }
        }

        round
    }

    async fn recover_one(orchestrator: &Orchestrator, project_id: &str) -> String {
        warn!("Project {} is port_down, attempting recovery", project_id);
        match orchestrator.recover(project_id).await {
            Ok(recovery) => match recovery.outcome {
                Some(outcome) if outcome.ready => "recovered".to_string(),
                Some(outcome) if outcome.success => "redeployed, not yet responding".to_string(),
                Some(_) => "redeploy failed".to_string(),
                None => format!("no recovery needed ({})", recovery.state),
            },
            Err(OrchestratorError::RecoveryInProgress(_)) => {
                "recovery already in progress".to_string()
            }
            Err(e) => {
                error!("Recovery of {} failed: {}", project_id, e);
                format!("recovery failed: {}", e)
            }
        }
    }

    pub async fn get_latest_check(&self, project_id: &str) -> Option<HealthCheck> {
        self.checks
            .read()
            .await
            .get(project_id)
            .and_then(|history| history.last().cloned())
    }

    pub async fn get_check_history(&self, project_id: &str) -> Vec<HealthCheck> {
        self.checks
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }
}
