use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use grainrpc_endpoint::EndpointStatistics;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command result printed as one JSON line, a two-column table, or a
/// single `key=value` line.
pub trait Report: Serialize {
    fn fields(&self) -> Vec<(&'static str, String)>;
}

pub fn print_report(report: &impl Report, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in report.fields() {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = report
                .fields()
                .into_iter()
                .map(|(field, value)| format!("{field}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

#[derive(Serialize)]
pub struct ListeningReport {
    pub event: &'static str,
    pub name: String,
    pub addr: String,
    pub grain: u64,
    pub authentication: bool,
}

impl Report for ListeningReport {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("event", self.event.to_string()),
            ("name", self.name.clone()),
            ("addr", self.addr.clone()),
            ("grain", self.grain.to_string()),
            ("authentication", self.authentication.to_string()),
        ]
    }
}

#[derive(Serialize)]
pub struct CallReport {
    pub connection_id: u64,
    pub grain: u64,
    pub request: String,
    pub response: String,
    pub elapsed_ms: f64,
}

impl Report for CallReport {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("connection_id", self.connection_id.to_string()),
            ("grain", self.grain.to_string()),
            ("request", self.request.clone()),
            ("response", self.response.clone()),
            ("elapsed_ms", format!("{:.2}", self.elapsed_ms)),
        ]
    }
}

#[derive(Serialize)]
pub struct ProbeReport {
    pub connected: bool,
    pub connection_id: u64,
    pub local_addr: Option<String>,
    pub remote_addr: Option<String>,
    pub remote_name: Option<String>,
    pub roundtrip_ms: f64,
    pub statistics: EndpointStatistics,
}

impl Report for ProbeReport {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let or_dash = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
        vec![
            ("connected", self.connected.to_string()),
            ("connection_id", self.connection_id.to_string()),
            ("local_addr", or_dash(&self.local_addr)),
            ("remote_addr", or_dash(&self.remote_addr)),
            ("remote_name", or_dash(&self.remote_name)),
            ("roundtrip_ms", format!("{:.3}", self.roundtrip_ms)),
            ("bytes_sent", self.statistics.bytes_sent.to_string()),
            ("bytes_received", self.statistics.bytes_received.to_string()),
            ("calls_invoked", self.statistics.calls_invoked.to_string()),
            ("calls_answered", self.statistics.calls_answered.to_string()),
            ("gc_sweeps", self.statistics.gc_sweeps.to_string()),
        ]
    }
}

pub fn millis(duration: std::time::Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn millis_keeps_microsecond_precision() {
        assert_eq!(millis(Duration::from_micros(1_234)), 1.234);
        assert_eq!(millis(Duration::ZERO), 0.0);
    }

    #[test]
    fn probe_fields_fill_missing_addresses() {
        let report = ProbeReport {
            connected: false,
            connection_id: 0,
            local_addr: None,
            remote_addr: Some("tcp://127.0.0.1:9".to_string()),
            remote_name: None,
            roundtrip_ms: 0.0,
            statistics: EndpointStatistics::default(),
        };
        let fields = report.fields();
        assert!(fields.contains(&("local_addr", "-".to_string())));
        assert!(fields.contains(&("remote_addr", "tcp://127.0.0.1:9".to_string())));
    }
}
