//! Operation log records
//!
//! Every component receives a [`Logger`] at construction. A logger formats
//! records into one [`LogSink`]; there is no process-wide logger state.
//!
//! ## Sinks
//! - `TracingSink` - forwards records into `tracing` (default)
//! - `ConsoleSink` - human readable lines on stderr
//! - `JsonSink` - one JSON object per line into any writer
//! - `MemorySink` - keeps records in memory for summaries and tests
//! - `FanoutSink` - sends each record to several sinks

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Severity of an operation record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "success" => Ok(Severity::Success),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// A single structured record: stable code, human message, flat context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub code: String,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Output capability for log records.
pub trait LogSink: Send + Sync {
    fn format(&self, severity: Severity, record: &LogRecord);
}

/// Cheap-to-clone handle passed to components.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    min_severity: Severity,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            min_severity: Severity::Info,
        }
    }

    /// Logger that discards everything
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Drop records below `min_severity`
    pub fn with_min_severity(mut self, min_severity: Severity) -> Self {
        self.min_severity = min_severity;
        self
    }

    pub fn log(&self, severity: Severity, record: LogRecord) {
        if severity >= self.min_severity {
            self.sink.format(severity, &record);
        }
    }

    pub fn info(&self, code: &str, message: impl Into<String>, context: &[(&str, &str)]) {
        self.log(Severity::Info, build_record(code, message, context));
    }

    pub fn success(&self, code: &str, message: impl Into<String>, context: &[(&str, &str)]) {
        self.log(Severity::Success, build_record(code, message, context));
    }

    pub fn warning(&self, code: &str, message: impl Into<String>, context: &[(&str, &str)]) {
        self.log(Severity::Warning, build_record(code, message, context));
    }

    pub fn error(&self, code: &str, message: impl Into<String>, context: &[(&str, &str)]) {
        self.log(Severity::Error, build_record(code, message, context));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_severity", &self.min_severity)
            .finish_non_exhaustive()
    }
}

fn build_record(code: &str, message: impl Into<String>, context: &[(&str, &str)]) -> LogRecord {
    context
        .iter()
        .fold(LogRecord::new(code, message), |record, (k, v)| {
            record.with(*k, *v)
        })
}

pub struct NoopSink;

impl LogSink for NoopSink {
    fn format(&self, _severity: Severity, _record: &LogRecord) {}
}

/// Forwards records into the `tracing` subscriber
pub struct TracingSink;

impl LogSink for TracingSink {
    fn format(&self, severity: Severity, record: &LogRecord) {
        let code = record.code.as_str();
        let context = &record.context;
        match severity {
            Severity::Info => tracing::info!(code, ?context, "{}", record.message),
            Severity::Success => tracing::info!(code, ?context, success = true, "{}", record.message),
            Severity::Warning => tracing::warn!(code, ?context, "{}", record.message),
            Severity::Error => tracing::error!(code, ?context, "{}", record.message),
        }
    }
}

/// Human readable output on stderr
pub struct ConsoleSink;

impl ConsoleSink {
    fn render(severity: Severity, record: &LogRecord) -> String {
        let mut line = format!(
            "{:<7} {}",
            severity.as_str().to_uppercase(),
            record.message
        );
        for (key, value) in &record.context {
            line.push_str(&format!(" {}={}", key, value));
        }
        line
    }
}

impl LogSink for ConsoleSink {
    fn format(&self, severity: Severity, record: &LogRecord) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", Self::render(severity, record));
    }
}

/// One JSON object per line
pub struct JsonSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    severity: Severity,
    #[serde(flatten)]
    record: &'a LogRecord,
}

impl JsonSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Append records to a file, creating it if needed
    pub fn to_file(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

impl LogSink for JsonSink {
    fn format(&self, severity: Severity, record: &LogRecord) {
        let line = JsonLine { severity, record };
        let Ok(json) = serde_json::to_string(&line) else {
            return;
        };
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{}", json);
        let _ = writer.flush();
    }
}

/// Keeps every record, queryable by severity
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Severity, LogRecord)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Severity, LogRecord)> {
        self.records.lock().clone()
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<LogRecord> {
        self.by_severity(Severity::Error)
    }

    pub fn warnings(&self) -> Vec<LogRecord> {
        self.by_severity(Severity::Warning)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.records.lock().iter().any(|(_, r)| r.code == code)
    }
}

impl LogSink for MemorySink {
    fn format(&self, severity: Severity, record: &LogRecord) {
        self.records.lock().push((severity, record.clone()));
    }
}

pub struct FanoutSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for FanoutSink {
    fn format(&self, severity: Severity, record: &LogRecord) {
        for sink in &self.sinks {
            sink.format(severity, record);
        }
    }
}
