//! Collector health and readiness

use anyhow::Result;
use colored::Colorize;
use meshflow_lib::{ComponentStatus, HealthResponse, ReadinessResponse};
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, print_json, print_rows, print_success, print_warning,
    OutputFormat,
};

#[derive(Tabled, Serialize)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct StatusReport {
    health: HealthResponse,
    readiness: ReadinessResponse,
}

fn status_name(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

fn component_rows(health: &HealthResponse) -> Vec<ComponentRow> {
    health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(status_name(component.status)),
            since: format_timestamp(&component.since.to_string()),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect()
}

pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;

    match format {
        OutputFormat::Json => print_json(&StatusReport { health, readiness }),
        OutputFormat::Table => {
            println!("{}", "Collector Status".bold());
            println!("{}", "=".repeat(50));
            println!("Health:    {}", color_status(status_name(health.status)));
            let ready = if readiness.ready { "ready" } else { "not ready" };
            println!("Readiness: {}", color_status(ready));
            println!();

            print_rows(&component_rows(&health), format);

            match (readiness.ready, readiness.reason) {
                (true, _) => print_success("Collector is accepting telemetry"),
                (false, Some(reason)) => print_warning(&reason),
                (false, None) => print_warning("Collector is not ready"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshflow_lib::ComponentHealth;

    #[test]
    fn test_component_rows_keep_messages() {
        let health = HealthResponse {
            status: ComponentStatus::Degraded,
            components: [
                ("collector".to_string(), ComponentHealth::healthy()),
                (
                    "identity_cache".to_string(),
                    ComponentHealth::degraded("Pod watch restarting"),
                ),
            ]
            .into(),
        };

        let rows = component_rows(&health);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "collector");
        assert_eq!(rows[0].message, "");
        assert_eq!(rows[1].message, "Pod watch restarting");
    }
}
