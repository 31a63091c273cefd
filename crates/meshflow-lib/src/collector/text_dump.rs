//! Legacy text-dump log path
//!
//! An OTLP export request is rendered into its human-readable nested dump
//! (`field:value`, `message:{...}`, strings quoted with `\"` escapes), and the
//! access-log line inside each record's string body is read by fixed token
//! position. The layout is the proxy's default access-log format:
//!
//! | token | field |
//! |-------|-------|
//! | 0 | start time |
//! | 1 | method |
//! | 2 | path |
//! | 3 | protocol |
//! | 4 | response code |
//! | 20 | destination `address:port` |
//! | 21 | source `address:port` |

use crate::models::{ApiLogRecord, Endpoint};
use crate::proto::otlp::{
    any_value, AnyValue, ExportLogsServiceRequest, InstrumentationScope, KeyValue, LogRecord,
    Resource, ResourceLogs, ScopeLogs,
};
use std::fmt::Write;

const RECORD_MARKER: &str = "log_records";
const STRING_FIELD: &str = "string_value:\"";

/// Fewest tokens a segment must carry to reach the source address
pub const MIN_TOKENS: usize = 22;

const TIMESTAMP: usize = 0;
const METHOD: usize = 1;
const PATH: usize = 2;
const PROTOCOL: usize = 3;
const RESPONSE_CODE: usize = 4;
const DESTINATION: usize = 20;
const SOURCE: usize = 21;

/// Result of decoding one export payload
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Decoded {
    pub records: Vec<ApiLogRecord>,
    /// Segments that carried a string body but too few tokens
    pub dropped: usize,
}

/// Turns an export request into canonical records, before enrichment
pub trait LogDecoder: Send + Sync {
    fn decode(&self, request: &ExportLogsServiceRequest) -> Decoded;
}

/// Positional parser over the rendered dump
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDumpDecoder;

impl LogDecoder for TextDumpDecoder {
    fn decode(&self, request: &ExportLogsServiceRequest) -> Decoded {
        parse_dump(&render(request))
    }
}

/// Parse a rendered dump. Segments without a string body are skipped silently;
/// segments with too few tokens are skipped and counted.
pub fn parse_dump(text: &str) -> Decoded {
    let cleaned = text.replace("\\\"", "").replace('}', "");
    let mut decoded = Decoded::default();

    // The text before the first marker is resource and scope metadata
    for segment in cleaned.split(RECORD_MARKER).skip(1) {
        let Some(index) = segment.find(STRING_FIELD) else {
            continue;
        };
        let tokens: Vec<&str> = segment[index + STRING_FIELD.len()..]
            .split_whitespace()
            .collect();

        match record_from_tokens(&tokens) {
            Some(record) => decoded.records.push(record),
            None => decoded.dropped += 1,
        }
    }
    decoded
}

fn record_from_tokens(tokens: &[&str]) -> Option<ApiLogRecord> {
    if tokens.len() < MIN_TOKENS {
        return None;
    }

    let (src_address, src_port) = split_host_port(tokens[SOURCE]);
    let (dst_address, dst_port) = split_host_port(tokens[DESTINATION]);

    Some(ApiLogRecord {
        sequence_id: 0,
        timestamp: tokens[TIMESTAMP].to_string(),
        src: Endpoint::new(src_address, src_port),
        dst: Endpoint::new(dst_address, dst_port),
        protocol: tokens[PROTOCOL].to_string(),
        method: tokens[METHOD].to_string(),
        path: tokens[PATH].to_string(),
        response_code: tokens[RESPONSE_CODE].parse().unwrap_or(0),
    })
}

/// Split on the last colon, so IPv6 literals keep their inner colons.
/// Tokens without a usable separator yield empty address and port.
pub fn split_host_port(token: &str) -> (&str, &str) {
    match token.rfind(':') {
        Some(i) if i > 0 && i < token.len() - 1 => (token[..i].trim(), token[i + 1..].trim()),
        _ => ("", ""),
    }
}

/// Render a request as a compact nested dump
pub fn render(request: &ExportLogsServiceRequest) -> String {
    let mut out = String::new();
    for resource_logs in &request.resource_logs {
        open(&mut out, "resource_logs");
        render_resource_logs(&mut out, resource_logs);
        close(&mut out);
    }
    out
}

fn open(out: &mut String, name: &str) {
    if !out.is_empty() && !out.ends_with('{') {
        out.push(' ');
    }
    out.push_str(name);
    out.push_str(":{");
}

fn close(out: &mut String) {
    out.push('}');
}

fn scalar(out: &mut String, name: &str, value: impl std::fmt::Display) {
    if !out.ends_with('{') && !out.is_empty() {
        out.push(' ');
    }
    let _ = write!(out, "{}:{}", name, value);
}

fn string(out: &mut String, name: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    scalar(out, name, quote(value));
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn render_resource_logs(out: &mut String, resource_logs: &ResourceLogs) {
    if let Some(resource) = &resource_logs.resource {
        open(out, "resource");
        render_resource(out, resource);
        close(out);
    }
    for scope_logs in &resource_logs.scope_logs {
        open(out, "scope_logs");
        render_scope_logs(out, scope_logs);
        close(out);
    }
    string(out, "schema_url", &resource_logs.schema_url);
}

fn render_resource(out: &mut String, resource: &Resource) {
    for attribute in &resource.attributes {
        open(out, "attributes");
        render_key_value(out, attribute);
        close(out);
    }
}

fn render_scope_logs(out: &mut String, scope_logs: &ScopeLogs) {
    if let Some(scope) = &scope_logs.scope {
        open(out, "scope");
        render_scope(out, scope);
        close(out);
    }
    for record in &scope_logs.log_records {
        open(out, RECORD_MARKER);
        render_log_record(out, record);
        close(out);
    }
}

fn render_scope(out: &mut String, scope: &InstrumentationScope) {
    string(out, "name", &scope.name);
    string(out, "version", &scope.version);
}

fn render_log_record(out: &mut String, record: &LogRecord) {
    if record.time_unix_nano != 0 {
        scalar(out, "time_unix_nano", record.time_unix_nano);
    }
    if record.severity_number != 0 {
        scalar(out, "severity_number", record.severity_number);
    }
    string(out, "severity_text", &record.severity_text);
    if let Some(body) = &record.body {
        open(out, "body");
        render_any_value(out, body);
        close(out);
    }
    for attribute in &record.attributes {
        open(out, "attributes");
        render_key_value(out, attribute);
        close(out);
    }
    if record.observed_time_unix_nano != 0 {
        scalar(out, "observed_time_unix_nano", record.observed_time_unix_nano);
    }
}

fn render_key_value(out: &mut String, kv: &KeyValue) {
    string(out, "key", &kv.key);
    if let Some(value) = &kv.value {
        open(out, "value");
        render_any_value(out, value);
        close(out);
    }
}

fn render_any_value(out: &mut String, value: &AnyValue) {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => scalar(out, "string_value", quote(s)),
        Some(any_value::Value::BoolValue(b)) => scalar(out, "bool_value", b),
        Some(any_value::Value::IntValue(i)) => scalar(out, "int_value", i),
        Some(any_value::Value::DoubleValue(d)) => scalar(out, "double_value", d),
        Some(any_value::Value::ArrayValue(array)) => {
            open(out, "array_value");
            for item in &array.values {
                open(out, "values");
                render_any_value(out, item);
                close(out);
            }
            close(out);
        }
        Some(any_value::Value::KvlistValue(list)) => {
            open(out, "kvlist_value");
            for kv in &list.values {
                open(out, "values");
                render_key_value(out, kv);
                close(out);
            }
            close(out);
        }
        Some(any_value::Value::BytesValue(bytes)) => {
            scalar(out, "bytes_value", quote(&String::from_utf8_lossy(bytes)))
        }
        None => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const CART_LINE: &str = "[2024-05-01T10:00:00.000Z] \"GET /cart HTTP/1.1\" 200 - via_upstream - \"-\" 0 15 3 2 \"-\" \"curl/8.0\" \"a1b2\" \"payments:9090\" \"10.0.0.9:9090\" outbound|9090||payments.shop.svc.cluster.local 10.0.0.5:41000 10.0.0.9:9090 10.0.0.5:8080 - default";

    pub(crate) fn export_request(lines: &[&str]) -> ExportLogsServiceRequest {
        ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                resource: Some(Resource {
                    attributes: vec![KeyValue {
                        key: "service.name".into(),
                        value: Some(AnyValue::string("istio-proxy")),
                    }],
                    dropped_attributes_count: 0,
                }),
                scope_logs: vec![ScopeLogs {
                    scope: Some(InstrumentationScope {
                        name: "envoy".into(),
                        version: String::new(),
                    }),
                    log_records: lines
                        .iter()
                        .map(|line| LogRecord {
                            time_unix_nano: 1_714_557_600_000_000_000,
                            body: Some(AnyValue::string(*line)),
                            ..Default::default()
                        })
                        .collect(),
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    #[test]
    fn test_render_nests_and_escapes() {
        let text = render(&export_request(&["say \"hi\""]));
        assert!(text.starts_with("resource_logs:{resource:{attributes:{key:\"service.name\""));
        assert!(text.contains("log_records:{time_unix_nano:1714557600000000000 body:{string_value:\"say \\\"hi\\\"\"}}"));
        assert!(text.ends_with("}}"));
    }

    #[test]
    fn test_decode_default_access_log_line() {
        let decoded = TextDumpDecoder.decode(&export_request(&[CART_LINE]));

        assert_eq!(decoded.dropped, 0);
        assert_eq!(decoded.records.len(), 1);
        let record = &decoded.records[0];
        assert_eq!(record.timestamp, "[2024-05-01T10:00:00.000Z]");
        assert_eq!(record.method, "GET");
        assert_eq!(record.path, "/cart");
        assert_eq!(record.protocol, "HTTP/1.1");
        assert_eq!(record.response_code, 200);
        assert_eq!(record.dst.address, "10.0.0.9");
        assert_eq!(record.dst.port, "9090");
        assert_eq!(record.src.address, "10.0.0.5");
        assert_eq!(record.src.port, "8080");
        assert_eq!(record.sequence_id, 0);
    }

    #[test]
    fn test_short_segments_dropped_and_counted() {
        let request = export_request(&[CART_LINE, "truncated GET /", CART_LINE, ""]);
        let decoded = TextDumpDecoder.decode(&request);

        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.dropped, 2);
    }

    #[test]
    fn test_metadata_before_first_record_ignored() {
        let decoded = parse_dump("resource_logs:{resource:{attributes:{value:{string_value:\"x\"}}}}");
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.dropped, 0);
    }

    #[test]
    fn test_record_without_string_body_skipped() {
        let decoded = parse_dump("scope_logs:{log_records:{time_unix_nano:5}}");
        assert_eq!(decoded, Decoded::default());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("10.0.0.5:8080"), ("10.0.0.5", "8080"));
        assert_eq!(split_host_port("[fd00::1]:443"), ("[fd00::1]", "443"));
        assert_eq!(split_host_port("fd00::1:443"), ("fd00::1", "443"));
        assert_eq!(split_host_port("-"), ("", ""));
        assert_eq!(split_host_port(":80"), ("", ""));
        assert_eq!(split_host_port("10.0.0.5:"), ("", ""));
    }

    #[test]
    fn test_unparsable_response_code_is_zero() {
        let line = CART_LINE.replace(" 200 ", " - ");
        let decoded = TextDumpDecoder.decode(&export_request(&[line.as_str()]));
        assert_eq!(decoded.records[0].response_code, 0);
    }
}
