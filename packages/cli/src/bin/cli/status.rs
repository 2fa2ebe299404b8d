// ABOUTME: `voxcraft status` command printing a bulk sandbox status table
// ABOUTME: Runs the bulk check against the local store and Docker without clearing records

use anyhow::Result;
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use voxcraft_cli::{build_orchestrator, Config};
use voxcraft_sandbox::SandboxState;

pub async fn print_status(config: &Config, project_ids: &[String]) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let reports = orchestrator.status_bulk_read_only(project_ids).await;

    let mut ids: Vec<&String> = reports.keys().collect();
    ids.sort();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Project", "State", "Sandbox", "Endpoint", "Detail"]);

    for id in ids {
        let report = &reports[id];
        let state = match report.state {
            SandboxState::Running => report.state.to_string().green(),
            SandboxState::PortDown => report.state.to_string().yellow(),
            SandboxState::Error => report.state.to_string().red(),
            SandboxState::Stopped => report.state.to_string().dimmed(),
        };
        table.add_row(vec![
            id.clone(),
            state.to_string(),
            report.external_id.clone().unwrap_or_else(|| "-".to_string()),
            report.endpoint.clone().unwrap_or_else(|| "-".to_string()),
            report.detail.clone().unwrap_or_default(),
        ]);
    }

    println!("{}", "Sandbox status".blue().bold());
    println!("{}", table);
    Ok(())
}
