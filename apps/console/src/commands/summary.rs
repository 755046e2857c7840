//! Show device reachability and the local user count.

use anyhow::{Context, Result};

use attendo_core::FleetSummary;

use crate::context::Console;
use crate::output::print_json;

/// Run the summary command.
pub async fn run(console: &Console) -> Result<()> {
    let summary = collect(console).await?;

    if console.json {
        return print_json(&summary);
    }

    for line in lines(&summary) {
        println!("{}", line);
    }
    Ok(())
}

pub async fn collect(console: &Console) -> Result<FleetSummary> {
    console
        .orchestrator(None)
        .fleet_summary()
        .await
        .context("Failed to build summary")
}

fn lines(summary: &FleetSummary) -> [String; 2] {
    [
        format!("Devices: {}", summary.devices_label()),
        format!("Users: {}", summary.user_count),
    ]
}
