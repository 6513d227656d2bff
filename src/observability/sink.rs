//! Batch sink with multiple outputs

use chrono::{DateTime, Local, Utc};
use colored::*;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use ureq::Agent;

use crate::analytics::{Event, HEARTBEAT_EVENT_TYPE, Listener};

/// Where dispatched batches go
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Append to daily JSONL files
    File,
    /// Print to stdout
    Stdout,
    /// POST the batch to an HTTP endpoint
    Http,
}

/// How the stdout sink renders events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFormat {
    Text,
    Json,
}

/// Format an event as a single display line
pub fn format_display(event: &Event) -> String {
    let local_time = DateTime::<Utc>::from_timestamp_millis(event.timestamp)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| event.timestamp.to_string());

    let event_colored = if event.event_type == HEARTBEAT_EVENT_TYPE {
        event.event_type.magenta()
    } else {
        event.event_type.cyan()
    };

    let mut parts = vec![local_time.dimmed().to_string(), event_colored.to_string()];

    if let Some(ref id) = event.element.element_id {
        parts.push(format!("#{}", id).bold().to_string());
    }

    if let Some(ref path) = event.element.element_path {
        parts.push(path.dimmed().to_string());
    }

    if !event.metadata.is_empty() {
        let keys: Vec<&str> = event.metadata.keys().map(String::as_str).collect();
        parts.push(format!("{{{}}}", keys.join(", ")).dimmed().to_string());
    }

    parts.join(" ")
}

/// Upper bound on one HTTP delivery, connect to last byte
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn http_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Listener that forwards batches to every configured output
pub struct BatchSink {
    sinks: Vec<SinkKind>,
    events_dir: PathBuf,
    http_endpoint: Option<String>,
    agent: Agent,
    format: DisplayFormat,
}

impl BatchSink {
    pub fn new(sinks: Vec<SinkKind>, events_dir: PathBuf) -> Self {
        Self {
            sinks,
            events_dir,
            http_endpoint: None,
            agent: http_agent(DEFAULT_HTTP_TIMEOUT),
            format: DisplayFormat::Text,
        }
    }

    /// Give up on an HTTP delivery after `timeout`
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.agent = http_agent(timeout);
        self
    }

    pub fn with_http_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.http_endpoint = endpoint;
        self
    }

    pub fn with_format(mut self, format: DisplayFormat) -> Self {
        self.format = format;
        self
    }

    /// Path of today's JSONL file
    pub fn today_log_path(&self) -> PathBuf {
        let now = Local::now();
        self.events_dir
            .join(now.format("%Y-%m").to_string())
            .join(format!("{}.jsonl", now.format("%Y-%m-%d")))
    }

    /// Append each event as one JSON line
    fn emit_to_file(&self, batch: &[Event]) -> Result<()> {
        let log_file = self.today_log_path();
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent).context("Failed to create events directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("Failed to open event log: {}", log_file.display()))?;

        for event in batch {
            let json = serde_json::to_string(event).context("Failed to serialize event")?;
            writeln!(file, "{}", json).context("Failed to write event")?;
        }

        log::debug!("Wrote {} events to {}", batch.len(), log_file.display());
        Ok(())
    }

    fn emit_to_stdout(&self, batch: &[Event]) -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for event in batch {
            match self.format {
                DisplayFormat::Text => writeln!(out, "{}", format_display(event))?,
                DisplayFormat::Json => writeln!(out, "{}", serde_json::to_string(event)?)?,
            }
        }
        out.flush()?;
        Ok(())
    }

    /// POST the whole batch as a JSON array
    fn emit_to_http(&self, batch: &[Event]) -> Result<()> {
        let endpoint = self
            .http_endpoint
            .as_ref()
            .ok_or_else(|| eyre!("HTTP endpoint not configured"))?;

        let body = serde_json::to_string(batch).context("Failed to serialize batch")?;

        self.agent
            .post(endpoint)
            .header("Content-Type", "application/json")
            .send(body.as_bytes())
            .map_err(|e| eyre!("HTTP request to {} failed: {}", endpoint, e))?;
        Ok(())
    }
}

impl Listener for BatchSink {
    fn on_batch(&self, batch: Vec<Event>) -> Result<()> {
        let mut failures = Vec::new();

        for sink in &self.sinks {
            let result = match sink {
                SinkKind::File => self.emit_to_file(&batch),
                SinkKind::Stdout => self.emit_to_stdout(&batch),
                SinkKind::Http => self.emit_to_http(&batch),
            };
            if let Err(e) = result {
                log::warn!("Failed to emit to {:?} sink: {:#}", sink, e);
                failures.push(format!("{:?}", sink).to_lowercase());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(eyre!("{} of {} sinks failed: {}", failures.len(), self.sinks.len(), failures.join(", ")))
        }
    }
}
