//! `PipelineExecutor`: drives the fixed stage order (Dedup -> Anon -> Mask)
//! over one or more input files, chaining each stage's output into the
//! next through per-file scratch files, and reporting progress through the
//! `Event` stream.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::events::{ErrorScope, Event, EventSink};
use crate::ipmap::IpMapping;
use crate::stages::anonymize::AnonymizationStage;
use crate::stages::dedup::DeduplicationStage;
use crate::stages::mask::MaskingStage;
use crate::stages::{Stage, StageStats};

/// One input/output file pair for a run. `output` is the path the final,
/// fully-processed capture is written to, regardless of how many stages
/// are enabled.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl FileJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// The per-run I/O policy: where scratch files live. Temp files for one
/// file's intermediate stage outputs land under
/// `<scratch_root>/<run_id>/<input_file_stem>/` and are removed on success,
/// failure, or cancellation - left behind only if the process itself
/// aborts before cleanup runs.
#[derive(Debug, Clone)]
pub struct IoPolicy {
    pub scratch_root: PathBuf,
    pub run_id: String,
}

impl IoPolicy {
    pub fn new(scratch_root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            run_id: run_id.into(),
        }
    }

    fn file_scratch_dir(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        self.scratch_root.join(&self.run_id).join(stem)
    }
}

/// The intermediate scratch file name for a non-terminal stage. The
/// anonymization stage is named `"anonymize"` (matching its `Stage::name`,
/// used in logs and `Event::StageSummary`) but its scratch artifact keeps
/// the shorter `after_anon.pcap` name the scratch layout specifies.
fn scratch_file_name(stage_name: &str) -> String {
    match stage_name {
        "dedup" => "after_dedup.pcap".to_string(),
        "anonymize" => "after_anon.pcap".to_string(),
        other => format!("after_{other}.pcap"),
    }
}

/// Aggregate outcome of one `PipelineExecutor::run` call.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Constructs the fixed three-stage pipeline (Dedup -> Anon -> Mask) and
/// drives it over a batch of files. `IpMapping` is the only state the
/// executor shares across files in one run; every stage resets its own
/// per-file state before each file via `Stage::begin_file`.
pub struct PipelineExecutor {
    stages: Vec<Box<dyn Stage>>,
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
    #[allow(dead_code)] // kept alive for stages built from it; not read directly here
    ip_mapping: Arc<IpMapping>,
}

impl PipelineExecutor {
    pub fn new(config: PipelineConfig) -> Self {
        let ip_mapping = Arc::new(IpMapping::new());
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(DeduplicationStage::new()),
            Box::new(AnonymizationStage::new(ip_mapping.clone())),
            Box::new(MaskingStage::new()),
        ];
        Self {
            stages,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            ip_mapping,
        }
    }

    /// A clone of the cancellation flag a caller can flip from another
    /// thread to request cancellation; checked at file and stage
    /// boundaries.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Runs `stage.initialize(&config)` for every enabled stage once,
    /// before any file is touched. An initialization failure aborts the
    /// whole run - the only case where the executor doesn't simply move on
    /// to the next file.
    fn initialize_stages(&mut self) -> Result<(), StageError> {
        for stage in &mut self.stages {
            if stage.is_enabled(&self.config) {
                stage.initialize(&self.config)?;
            }
        }
        Ok(())
    }

    /// Processes every job in `jobs` sequentially, emitting `Event`s to
    /// `sink` as it goes. Per-file failures are reported and do not abort
    /// the run; only an `initialize` failure does.
    pub fn run(&mut self, jobs: &[FileJob], io: &IoPolicy, mut sink: impl EventSink) -> Result<RunSummary, StageError> {
        sink.emit(Event::PipelineStart {
            input_count: jobs.len(),
        });

        if let Err(e) = self.initialize_stages() {
            sink.emit(Event::Error {
                scope: ErrorScope::Run,
                kind: e.kind(),
                message: e.to_string(),
                path: None,
            });
            return Err(e);
        }

        let mut summary = RunSummary::default();

        for job in jobs {
            if self.is_cancelled() {
                sink.emit(Event::PipelineCancelled);
                return Ok(summary);
            }

            match self.run_one_file(job, io, &mut sink) {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    summary.failed += 1;
                    sink.emit(Event::Error {
                        scope: ErrorScope::File,
                        kind: e.kind(),
                        message: e.to_string(),
                        path: Some(job.input.clone()),
                    });
                    warn!(file = %job.input.display(), error = %e, "file failed, continuing with next");
                }
            }
        }

        sink.emit(Event::PipelineEnd {
            succeeded: summary.succeeded,
            failed: summary.failed,
        });
        Ok(summary)
    }

    /// Runs the enabled stages in order over one file, chaining temp files
    /// through the per-file scratch directory, then copies/renames the
    /// last enabled stage's output to `job.output`. Deletes the scratch
    /// directory on both success and failure.
    fn run_one_file(&mut self, job: &FileJob, io: &IoPolicy, sink: &mut impl EventSink) -> Result<(), StageError> {
        let start = Instant::now();
        sink.emit(Event::FileStart {
            path: job.input.clone(),
        });

        let scratch_dir = io.file_scratch_dir(&job.input);
        fs::create_dir_all(&scratch_dir)?;

        let result = self.run_stages_chained(job, &scratch_dir, sink);

        // Scratch files are removed on both success and failure; only a
        // catastrophic process-level abort would skip this.
        let _ = fs::remove_dir_all(&scratch_dir);

        let (packets_in, packets_out) = match &result {
            Ok(counts) => *counts,
            Err(_) => (0, 0),
        };

        if result.is_ok() {
            sink.emit(Event::FileEnd {
                path: job.input.clone(),
                packets_in,
                packets_out,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        result.map(|_| ())
    }

    fn run_stages_chained(
        &mut self,
        job: &FileJob,
        scratch_dir: &Path,
        sink: &mut impl EventSink,
    ) -> Result<(u64, u64), StageError> {
        let enabled_indices: Vec<usize> = (0..self.stages.len())
            .filter(|&i| self.stages[i].is_enabled(&self.config))
            .collect();

        if enabled_indices.is_empty() {
            fs::copy(&job.input, &job.output)?;
            return Ok((0, 0));
        }

        let mut current_input = job.input.clone();
        let mut first_packets_in = 0u64;
        let mut last_packets_out = 0u64;

        for (pos, &idx) in enabled_indices.iter().enumerate() {
            if self.is_cancelled() {
                sink.emit(Event::PipelineCancelled);
                return Err(StageError::Cancelled);
            }

            let is_last = pos == enabled_indices.len() - 1;
            let stage_output = if is_last {
                job.output.clone()
            } else {
                scratch_dir.join(scratch_file_name(self.stages[idx].name()))
            };

            let stage = &mut self.stages[idx];
            stage.begin_file();
            stage.set_file_scratch_dir(Some(scratch_dir));

            let stage_name = stage.name();
            let stats = match stage.process(&current_input, &stage_output) {
                Ok(stats) => stats,
                Err(e) => {
                    sink.emit(Event::Error {
                        scope: ErrorScope::Stage(stage_name),
                        kind: e.kind(),
                        message: e.to_string(),
                        path: Some(job.input.clone()),
                    });
                    return Err(e);
                }
            };

            info!(
                stage = stage_name,
                packets_in = stats.packets_in,
                packets_modified = stats.packets_modified,
                "stage finished"
            );
            sink.emit(Event::StageSummary {
                stage_name,
                packets_processed: stats.packets_in,
                packets_modified: stats.packets_modified,
                extra_metrics: stats.extra.clone(),
            });

            if pos == 0 {
                first_packets_in = stats.packets_in;
            }
            last_packets_out = stats.packets_out;

            current_input = stage_output;
        }

        Ok((first_packets_in, last_packets_out))
    }
}
