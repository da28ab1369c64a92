//! The structured `Event` stream the executor emits to a subscriber.
//! This is the caller-facing, machine-consumable notification channel,
//! separate from the `tracing` spans/events used for developer-facing
//! diagnostics - a GUI or CLI renders progress from `Event`s, not logs.

use std::path::PathBuf;

use crate::error::ErrorKind;

/// Where an `Event::Error` originated, so a subscriber can decide whether
/// the run, one file, or one stage within a file is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Failed before any file was processed (e.g. a stage's `initialize`).
    Run,
    /// Failed while processing one file; the executor moves on to the next.
    File,
    /// Failed inside one stage's `process` call for one file.
    Stage(&'static str),
}

/// One notification emitted by `PipelineExecutor::run`. The sequence
/// for a successful run is: one `PipelineStart`, then for each file one
/// `FileStart`, one `StageSummary` per enabled stage, and one `FileEnd`;
/// finally one `PipelineEnd`. `Error` and `PipelineCancelled` interleave
/// wherever they occur.
#[derive(Debug, Clone)]
pub enum Event {
    PipelineStart {
        input_count: usize,
    },
    PipelineEnd {
        succeeded: usize,
        failed: usize,
    },
    FileStart {
        path: PathBuf,
    },
    FileEnd {
        path: PathBuf,
        packets_in: u64,
        packets_out: u64,
        duration_ms: u64,
    },
    StageSummary {
        stage_name: &'static str,
        packets_processed: u64,
        packets_modified: u64,
        extra_metrics: serde_json::Map<String, serde_json::Value>,
    },
    Error {
        scope: ErrorScope,
        kind: ErrorKind,
        message: String,
        path: Option<PathBuf>,
    },
    PipelineCancelled,
}

/// Anything that can receive the executor's `Event` stream. A plain
/// `FnMut(Event)` closure implements this automatically, so most callers
/// never need to name the trait - it exists so `PipelineExecutor::run` has
/// one concrete parameter type to document instead of a bare generic bound
/// repeated at every call site.
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl<F: FnMut(Event)> EventSink for F {
    fn emit(&mut self, event: Event) {
        self(event)
    }
}

/// An `EventSink` that drops everything - the default for callers that only
/// care about the returned `RunSummary`/`Result`, not live progress.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_implement_event_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: Event| seen.push(e);
            sink.emit(Event::PipelineCancelled);
        }
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn null_sink_drops_everything() {
        let mut sink = NullSink;
        sink.emit(Event::PipelineStart { input_count: 3 });
    }
}
