//! fastrace reporter writing one Chrome Trace Event JSON file per trace.
//!
//! Files are named `{timestamp_ms}_{trace_id}.json`; open them with
//! `chrome://tracing` or <https://ui.perfetto.dev>.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use fastrace::collector::{Reporter, SpanRecord};
use log::error;
use serde::Serialize;

pub struct FileReporter {
    output_dir: PathBuf,
    pid: u32,
}

impl FileReporter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            pid: std::process::id(),
        }
    }
}

/// One Chrome trace event. Times are in microseconds.
#[derive(Serialize)]
struct TraceEvent {
    name: String,
    cat: &'static str,
    ph: &'static str,
    ts: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: u32,
    tid: u64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    args: HashMap<String, String>,
}

fn ns_to_us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

impl FileReporter {
    /// A span becomes a complete ("X") event; its events become instant
    /// ("i") markers on the same track.
    fn convert(&self, span: SpanRecord, out: &mut Vec<TraceEvent>) {
        for event in &span.events {
            out.push(TraceEvent {
                name: event.name.to_string(),
                cat: "event",
                ph: "i",
                ts: ns_to_us(event.timestamp_unix_ns),
                dur: None,
                pid: self.pid,
                tid: 1,
                args: event
                    .properties
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }

        let mut args: HashMap<String, String> = span
            .properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        args.insert("span_id".into(), span.span_id.to_string());
        args.insert("parent_id".into(), span.parent_id.to_string());

        out.push(TraceEvent {
            name: span.name.into_owned(),
            cat: "span",
            ph: "X",
            ts: ns_to_us(span.begin_time_unix_ns),
            dur: Some(ns_to_us(span.duration_ns)),
            pid: self.pid,
            tid: 1,
            args,
        });
    }
}

impl Reporter for FileReporter {
    fn report(&mut self, spans: Vec<SpanRecord>) {
        if spans.is_empty() {
            return;
        }

        let mut traces: HashMap<String, Vec<TraceEvent>> = HashMap::new();
        for span in spans {
            let trace_id = span.trace_id.to_string();
            self.convert(span, traces.entry(trace_id).or_default());
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        for (trace_id, mut events) in traces {
            events.sort_by(|a, b| a.ts.total_cmp(&b.ts));

            let path = self
                .output_dir
                .join(format!("{}_{}.json", timestamp_ms, trace_id));
            match serde_json::to_string_pretty(&events) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(&path, json) {
                        error!("Failed to write trace file {}: {}", path.display(), e);
                    }
                }
                Err(e) => error!("Failed to serialize trace {}: {}", trace_id, e),
            }
        }
    }
}
