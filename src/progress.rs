//! Pipeline progress reporting.
//!
//! The orchestrator reports `(step, fraction)` pairs as a file moves through
//! extraction, chunking, enrichment, embedding, and storage. Embedding
//! reports a fraction per completed sub-batch; the other steps report 0.0
//! when they start.
//!
//! CLI reporters write to **stderr** so stdout remains parseable for
//! scripts. Any `Fn(PipelineStep, f32)` closure is also a reporter, which is
//! what programmatic callers and tests use.

use std::fmt;
use std::io::Write;

/// Stage of a single-file pipeline run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PipelineStep {
    Extracting,
    Chunking,
    Enriching,
    Embedding,
    Storing,
    Done,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Extracting => "extracting",
            PipelineStep::Chunking => "chunking",
            PipelineStep::Enriching => "enriching",
            PipelineStep::Embedding => "embedding",
            PipelineStep::Storing => "storing",
            PipelineStep::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives progress events. `fraction` is in `0.0..=1.0`.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, step: PipelineStep, fraction: f32);
}

impl<F> ProgressReporter for F
where
    F: Fn(PipelineStep, f32) + Send + Sync,
{
    fn report(&self, step: PipelineStep, fraction: f32) {
        self(step, fraction)
    }
}

/// Human-friendly progress on stderr: "  embedding    40%".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, step: PipelineStep, fraction: f32) {
        let line = format!("  {:<11} {:>3}%\n", step.as_str(), percent(fraction));
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, step: PipelineStep, fraction: f32) {
        let obj = serde_json::json!({
            "event": "progress",
            "step": step.as_str(),
            "fraction": fraction.clamp(0.0, 1.0),
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
    fn report(&self, _step: PipelineStep, _fraction: f32) {}
}

fn percent(fraction: f32) -> u32 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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
