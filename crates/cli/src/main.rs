//! MeshFlow CLI
//!
//! Subscribes to the collector's outbound streams and prints records,
//! and reports collector health.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{status, stream};

/// MeshFlow collector CLI
#[derive(Parser)]
#[command(name = "mfctl")]
#[command(author, version, about = "CLI for the MeshFlow telemetry collector", long_about = None)]
pub struct Cli {
    /// Subscriber endpoint of the collector [default: http://localhost:8080]
    #[arg(long, env = "MFCTL_SERVER")]
    pub server: Option<String>,

    /// Health endpoint of the collector [default: http://localhost:9090]
    #[arg(long, env = "MFCTL_API_URL")]
    pub api_url: Option<String>,

    /// Hostname reported to the collector when subscribing
    #[arg(long, env = "MFCTL_HOSTNAME")]
    pub hostname: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream enriched API logs
    Logs {
        /// Only show calls with either end in this namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Stream per-API usage counts
    ApiMetrics,

    /// Stream proxy metrics snapshots
    EnvoyMetrics,

    /// Show collector health and readiness
    Status,
}

async fn subscribe(
    config: &config::Config,
    server: Option<String>,
    hostname: Option<String>,
) -> Result<client::SubscriberClient> {
    let server = config.server(server);
    let hostname = config.hostname(hostname);
    Ok(client::SubscriberClient::connect(&server, &hostname).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        server,
        api_url,
        hostname,
        format,
        command,
    } = Cli::parse();
    let config = config::Config::load()?;

    match command {
        Commands::Logs { namespace } => {
            let mut client = subscribe(&config, server, hostname).await?;
            stream::follow_api_logs(&mut client, namespace, format).await?;
        }
        Commands::ApiMetrics => {
            let mut client = subscribe(&config, server, hostname).await?;
            stream::follow_api_metrics(&mut client, format).await?;
        }
        Commands::EnvoyMetrics => {
            let mut client = subscribe(&config, server, hostname).await?;
            stream::follow_envoy_metrics(&mut client, format).await?;
        }
        Commands::Status => {
            let client = client::ApiClient::new(&config.api_url(api_url))?;
            status::show_status(&client, format).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_logs_namespace_flag() {
        let cli = Cli::try_parse_from(["mfctl", "logs", "--namespace", "shop"]).unwrap();
        match cli.command {
            Commands::Logs { namespace } => assert_eq!(namespace.as_deref(), Some("shop")),
            _ => panic!("expected logs command"),
        }
    }

    #[test]
    fn test_format_json() {
        let cli = Cli::try_parse_from(["mfctl", "--format", "json", "envoy-metrics"]).unwrap();
        assert_eq!(cli.format, output::OutputFormat::Json);
        assert!(matches!(cli.command, Commands::EnvoyMetrics));
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(Cli::try_parse_from(["mfctl", "--format", "yaml", "status"]).is_err());
    }
}
