//! Structured access-log path: typed ALS entries to canonical records

use crate::models::{ApiLogRecord, Endpoint};
use crate::proto::envoy::{
    stream_access_logs_message::LogEntries, Address, HttpAccessLogEntry, HttpVersion,
    RequestMethod, StreamAccessLogsMessage,
};

/// HTTP entries of one stream message. TCP entries carry no request and are ignored.
pub fn records_from_message(message: &StreamAccessLogsMessage) -> Vec<ApiLogRecord> {
    match &message.log_entries {
        Some(LogEntries::HttpLogs(logs)) => logs.log_entry.iter().map(record_from_entry).collect(),
        Some(LogEntries::TcpLogs(_)) | None => Vec::new(),
    }
}

pub fn record_from_entry(entry: &HttpAccessLogEntry) -> ApiLogRecord {
    let common = entry.common_properties.as_ref();
    let request = entry.request.as_ref();

    let method = request
        .and_then(|r| RequestMethod::try_from(r.request_method).ok())
        .unwrap_or(RequestMethod::MethodUnspecified);
    let protocol =
        HttpVersion::try_from(entry.protocol_version).unwrap_or(HttpVersion::ProtocolUnspecified);

    ApiLogRecord {
        sequence_id: 0,
        timestamp: common
            .and_then(|c| c.start_time.as_ref())
            .map(|t| t.seconds)
            .unwrap_or_default()
            .to_string(),
        src: endpoint(common.and_then(|c| c.downstream_remote_address.as_ref())),
        dst: endpoint(common.and_then(|c| c.upstream_remote_address.as_ref())),
        protocol: protocol.name().to_string(),
        method: method.name().to_string(),
        path: request.map(|r| r.path.clone()).unwrap_or_default(),
        response_code: entry
            .response
            .as_ref()
            .and_then(|r| r.response_code)
            .map(|code| code as i32)
            .unwrap_or_default(),
    }
}

fn endpoint(address: Option<&Address>) -> Endpoint {
    match address.and_then(|a| a.socket_address.as_ref()) {
        Some(socket) => Endpoint::new(socket.address.clone(), socket.port_value.to_string()),
        None => Endpoint::new("", "0"),
    }
}
