//! LogSink: append-only JSONL event recorder (spec §2, §6).
//!
//! One JSON object per line, with `{timestamp (RFC3339 UTC), level, run_id,
//! component, operation, ...fields}`. Events below the configured severity
//! are dropped. Grounded in `original_source/jelly/run_logging.py`'s
//! `RunLogger`/`_TimedEvent`, reimplemented as a cheaply-cloneable struct
//! wrapping a mutex-guarded file handle (spec §5's "global log file handle"
//! design note: model as a single writer protected by a mutex).

use chrono::Utc;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Level {
        match s.to_uppercase().as_str() {
            "DEBUG" => Level::Debug,
            "WARNING" | "WARN" => Level::Warning,
            "ERROR" => Level::Error,
            "CRITICAL" => Level::Critical,
            _ => Level::Info,
        }
    }
}

#[derive(Clone)]
pub struct LogSink {
    run_id: String,
    log_file: PathBuf,
    level: Level,
    base_fields: Map<String, Value>,
    writer: Arc<Mutex<()>>,
}

impl LogSink {
    /// Create a sink writing to `log_dir/run_<run_id>.jsonl`.
    pub fn create(log_dir: impl AsRef<Path>, level: Level, run_id: Option<String>) -> std::io::Result<Self> {
        let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..12].to_string());
        fs::create_dir_all(&log_dir)?;
        let log_file = log_dir.as_ref().join(format!("run_{run_id}.jsonl"));
        Ok(Self {
            run_id,
            log_file,
            level,
            base_fields: Map::new(),
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// A derived sink that always carries `base_fields` on top of every
    /// event's own fields (spec's `RunLogger.child` equivalent), used to
    /// scope a logger to one component without repeating fields at each
    /// call site.
    pub fn child(&self, base_fields: Vec<(&str, Value)>) -> Self {
        let mut merged = self.base_fields.clone();
        for (k, v) in base_fields {
            merged.insert(k.to_string(), v);
        }
        Self {
            run_id: self.run_id.clone(),
            log_file: self.log_file.clone(),
            level: self.level,
            base_fields: merged,
            writer: self.writer.clone(),
        }
    }

    pub fn should_log(&self, level: Level) -> bool {
        level >= self.level
    }

    pub fn event(&self, level: Level, component: &str, operation: &str, fields: Vec<(&str, Value)>) {
        if !self.should_log(level) {
            return;
        }
        let mut payload = Map::new();
        payload.insert("timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
        payload.insert("level".to_string(), Value::String(level.as_str().to_string()));
        payload.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        payload.insert("component".to_string(), Value::String(component.to_string()));
        payload.insert("operation".to_string(), Value::String(operation.to_string()));
        for (k, v) in &self.base_fields {
            payload.insert(k.clone(), v.clone());
        }
        for (k, v) in fields {
            payload.insert(k.to_string(), v);
        }

        let line = Value::Object(payload).to_string();
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.log_file) {
            let _ = writeln!(file, "{line}");
        }
    }

    /// Scoped timing block: emits a DEBUG `<operation>.start` event, then
    /// the caller-chosen level on success (or ERROR on a dropped guard with
    /// an explicit `err` call), carrying `duration_ms`.
    pub fn timed(&self, component: &str, operation: &str) -> TimedEvent<'_> {
        self.event(Level::Debug, component, &format!("{operation}.start"), vec![]);
        TimedEvent {
            sink: self,
            component: component.to_string(),
            operation: operation.to_string(),
            start: std::time::Instant::now(),
            level: Level::Info,
            outcome: None,
        }
    }
}

pub struct TimedEvent<'a> {
    sink: &'a LogSink,
    component: String,
    operation: String,
    start: std::time::Instant,
    level: Level,
    outcome: Option<(String, String)>,
}

impl<'a> TimedEvent<'a> {
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Record an error outcome instead of a plain completion.
    pub fn fail(mut self, error_type: &str, error_message: &str) -> Self {
        self.outcome = Some((error_type.to_string(), error_message.to_string()));
        self
    }
}

impl<'a> Drop for TimedEvent<'a> {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        match self.outcome.take() {
            Some((error_type, error_message)) => {
                self.sink.event(
                    Level::Error,
                    &self.component,
                    &self.operation,
                    vec![
                        ("duration_ms".into(), Value::from(duration_ms)),
                        ("error_type".into(), Value::String(error_type)),
                        ("error_message".into(), Value::String(error_message)),
                    ],
                );
            }
            None => {
                self.sink.event(
                    self.level,
                    &self.component,
                    &self.operation,
                    vec![("duration_ms".into(), Value::from(duration_ms))],
                );
            }
        }
    }
}
