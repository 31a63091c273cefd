//! Subscriber commands: follow one outbound stream until Ctrl-C

use anyhow::Result;
use colored::Colorize;
use meshflow_lib::proto::meshflow::{ApiLog, ApiMetrics, EnvoyMetrics};
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;
use tonic::codec::Streaming;

use crate::client::{StreamError, SubscriberClient};
use crate::output::{
    color_response_code, format_labels, format_timestamp, format_workload, print_info,
    print_json, print_rows, print_warning, OutputFormat,
};

/// Row for the API log table
#[derive(Tabled, Serialize)]
struct LogRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Code")]
    code: String,
}

impl From<&ApiLog> for LogRow {
    fn from(log: &ApiLog) -> Self {
        Self {
            id: log.id,
            time: format_timestamp(&log.time_stamp),
            source: format_workload(&log.src_namespace, &log.src_name, &log.src_ip),
            destination: format_workload(&log.dst_namespace, &log.dst_name, &log.dst_ip),
            method: log.method.clone(),
            path: log.path.clone(),
            code: color_response_code(log.response_code),
        }
    }
}

/// JSON form of an API log, with every field of the wire record
#[derive(Serialize)]
struct LogDocument<'a> {
    id: u64,
    time_stamp: &'a str,
    src: WorkloadDocument<'a>,
    dst: WorkloadDocument<'a>,
    protocol: &'a str,
    method: &'a str,
    path: &'a str,
    response_code: i32,
}

#[derive(Serialize)]
struct WorkloadDocument<'a> {
    namespace: &'a str,
    name: &'a str,
    kind: &'a str,
    ip: &'a str,
    port: &'a str,
    labels: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a ApiLog> for LogDocument<'a> {
    fn from(log: &'a ApiLog) -> Self {
        Self {
            id: log.id,
            time_stamp: &log.time_stamp,
            src: WorkloadDocument {
                namespace: &log.src_namespace,
                name: &log.src_name,
                kind: &log.src_type,
                ip: &log.src_ip,
                port: &log.src_port,
                labels: &log.src_label,
            },
            dst: WorkloadDocument {
                namespace: &log.dst_namespace,
                name: &log.dst_name,
                kind: &log.dst_type,
                ip: &log.dst_ip,
                port: &log.dst_port,
                labels: &log.dst_label,
            },
            protocol: &log.protocol,
            method: &log.method,
            path: &log.path,
            response_code: log.response_code,
        }
    }
}

#[derive(Tabled, Serialize)]
struct UsageRow {
    #[tabled(rename = "API")]
    api: String,
    #[tabled(rename = "Count")]
    count: u64,
}

#[derive(Tabled, Serialize)]
struct MetricRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Metric")]
    name: String,
    #[tabled(rename = "Value")]
    value: f64,
}

/// True when either end of the call is in `namespace`
fn in_namespace(log: &ApiLog, namespace: Option<&str>) -> bool {
    match namespace {
        Some(ns) => log.src_namespace == ns || log.dst_namespace == ns,
        None => true,
    }
}

/// Busiest APIs first
fn usage_rows(metrics: &ApiMetrics) -> Vec<UsageRow> {
    let mut rows: Vec<UsageRow> = metrics
        .per_api_counts
        .iter()
        .map(|(api, count)| UsageRow {
            api: api.clone(),
            count: *count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.api.cmp(&b.api)));
    rows
}

fn metric_rows(metrics: &EnvoyMetrics) -> Vec<MetricRow> {
    metrics
        .metrics
        .iter()
        .flat_map(|(kind, values)| {
            values.value.iter().map(move |(name, value)| MetricRow {
                kind: kind.clone(),
                name: name.clone(),
                value: *value,
            })
        })
        .collect()
}

/// Apply `handle` to each message until the server closes the stream or Ctrl-C
async fn follow<M, F>(mut stream: Streaming<M>, mut handle: F) -> Result<()>
where
    F: FnMut(M),
{
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            message = stream.message() => match message {
                Ok(Some(message)) => handle(message),
                Ok(None) => {
                    print_warning("Stream closed by the collector");
                    return Ok(());
                }
                Err(status) => return Err(StreamError::Rejected(status).into()),
            },
            _ = &mut interrupted => return Ok(()),
        }
    }
}

pub async fn follow_api_logs(
    client: &mut SubscriberClient,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let stream = client.api_logs().await?;
    if format == OutputFormat::Table {
        print_info("Streaming API logs, press Ctrl-C to stop");
    }

    follow(stream, |log| {
        if !in_namespace(&log, namespace.as_deref()) {
            return;
        }
        match format {
            OutputFormat::Json => print_json(&LogDocument::from(&log)),
            OutputFormat::Table => print_rows(&[LogRow::from(&log)], format),
        }
    })
    .await
}

pub async fn follow_api_metrics(client: &mut SubscriberClient, format: OutputFormat) -> Result<()> {
    let stream = client.api_metrics().await?;
    if format == OutputFormat::Table {
        print_info("Streaming API usage, press Ctrl-C to stop");
    }

    follow(stream, |metrics| match format {
        OutputFormat::Json => print_json(&metrics.per_api_counts),
        OutputFormat::Table => {
            println!("\n{}", chrono::Local::now().format("%H:%M:%S").to_string().bold());
            print_rows(&usage_rows(&metrics), format);
        }
    })
    .await
}

pub async fn follow_envoy_metrics(
    client: &mut SubscriberClient,
    format: OutputFormat,
) -> Result<()> {
    let stream = client.envoy_metrics().await?;
    if format == OutputFormat::Table {
        print_info("Streaming proxy metrics, press Ctrl-C to stop");
    }

    follow(stream, |metrics| match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "time_stamp": metrics.time_stamp,
            "namespace": metrics.namespace,
            "name": metrics.name,
            "ip_address": metrics.ip_address,
            "labels": metrics.labels,
            "metrics": metrics
                .metrics
                .iter()
                .map(|(kind, values)| (kind.clone(), values.value.clone()))
                .collect::<BTreeMap<_, _>>(),
        })),
        OutputFormat::Table => {
            println!(
                "\n{} {} {}",
                format_workload(&metrics.namespace, &metrics.name, &metrics.ip_address)
                    .cyan()
                    .bold(),
                format_labels(&metrics.labels),
                format_timestamp(&metrics.time_stamp).dimmed(),
            );
            print_rows(&metric_rows(&metrics), format);
        }
    })
    .await
}
