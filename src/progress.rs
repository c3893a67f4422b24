//! Export progress reporting.
//!
//! Reports observable progress while a session harvests and renders, so users
//! see how many records and images have been collected and which output part
//! is being filled. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts. It is purely observational: nothing in the
//! pipeline depends on a reporter succeeding.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// A single progress observation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub record_count: usize,
    pub media_count: usize,
    /// 1-based index of the chunk currently being filled.
    pub chunk_index: usize,
    /// Rough completion estimate in `0..=100`. Never decreases within a session.
    pub percent_hint: u8,
    pub status: String,
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: "[ 42%] Collected 1,234 records  images 56  part 3".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let line = format!(
            "[{:>3}%] {}  records {}  images {}  part {}\n",
            event.percent_hint,
            event.status,
            format_number(event.record_count as u64),
            format_number(event.media_count as u64),
            event.chunk_index
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "records": event.record_count,
            "media": event.media_count,
            "part": event.chunk_index,
            "percent": event.percent_hint,
            "status": event.status,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Keeps every event in memory. Used by tests and embedders that poll.
#[derive(Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressReporter for CollectingProgress {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
