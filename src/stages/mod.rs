//! The three pipeline stages share one contract: take an input capture
//! file, write a transformed output capture file, and report what happened.
//! `PipelineExecutor` (src/pipeline.rs) drives them in the fixed order
//! Deduplication -> Anonymization -> Masking.

pub mod anonymize;
pub mod dedup;
pub mod mask;

use std::path::Path;

use serde_json::{Map, Value};

use crate::config::PipelineConfig;
use crate::error::StageError;

/// Per-file outcome of running one stage. `extra` carries stage-specific
/// counters (e.g. dedup's `duplicates_removed`, anon's `unique_ips_seen`)
/// that get folded into the `Event::StageSummary` the pipeline emits.
#[derive(Debug, Clone, Default)]
pub struct StageStats {
    pub packets_in: u64,
    pub packets_out: u64,
    pub packets_modified: u64,
    pub extra: Map<String, Value>,
}

impl StageStats {
    pub fn set_extra(&mut self, key: &str, value: impl Into<Value>) {
        self.extra.insert(key.to_string(), value.into());
    }
}

/// A stage that rewrites one capture file into another. Implementations
/// keep per-file state (seen-hash tables, sequence counters) behind
/// `&mut self` and reset it in `begin_file`; state meant to persist across
/// files in one run (the IP mapping) lives outside the stage entirely and
/// is shared via `Arc`/a lock instead.
pub trait Stage: Send {
    /// Stable identifier used in logs and `Event::StageSummary`.
    fn name(&self) -> &'static str;

    /// Whether this stage is enabled for the current run; a disabled stage
    /// is skipped by the pipeline, which simply copies the file through.
    fn is_enabled(&self, config: &PipelineConfig) -> bool;

    /// Applies run-level configuration. Called once per run, before the
    /// first file, and never again - configuration does not change mid-run.
    fn configure(&mut self, _config: &PipelineConfig) {}

    /// Resets any per-file state. Called once before every file, including
    /// the first.
    fn begin_file(&mut self);

    /// Called once per stage before the first file is processed. The
    /// default just forwards to `configure`; no stage currently needs more
    /// than that, but the hook exists for a stage whose setup can fail
    /// independently of any one file (an external dissector unreachable at
    /// startup, say) and should abort the whole run rather than only the
    /// file it happens to hit first.
    fn initialize(&mut self, config: &PipelineConfig) -> Result<(), StageError> {
        self.configure(config);
        Ok(())
    }

    /// Tells the stage where to drop per-file diagnostic artifacts (the
    /// scratch subdirectory for the file currently being processed), or
    /// `None` when no scratch directory is configured. Most stages ignore
    /// this; `MaskingStage` uses it to write `keep_rules.json`.
    fn set_file_scratch_dir(&mut self, _dir: Option<&Path>) {}

    /// Reads `input`, writes the transformed capture to `output`, returns
    /// per-file stats.
    fn process(&mut self, input: &Path, output: &Path) -> Result<StageStats, StageError>;
}
