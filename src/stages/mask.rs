//! `MaskingStage`: wires `NativeTlsDissector` -> `TLSProtocolMarker` ->
//! `PayloadMasker` into one `Stage`. Builds the `KeepRuleSet` for the whole
//! file once, then sweeps packets applying it. Runs last in the fixed
//! pipeline order, after Deduplication and Anonymization.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{PipelineConfig, PreserveConfig};
use crate::error::StageError;
use crate::mask::{MaskOutcome, PayloadMasker};
use crate::marker::TLSProtocolMarker;
use crate::pcap_io::{peek_format, PcapReader, PcapWriter};
use crate::stages::{Stage, StageStats};
use crate::tls::NativeTlsDissector;
use crate::types::KeepRuleSet;

pub struct MaskingStage {
    dissector: NativeTlsDissector,
    masker: PayloadMasker,
    preserve: PreserveConfig,
    is_tls: bool,
    scratch_dir: Option<PathBuf>,
}

impl Default for MaskingStage {
    fn default() -> Self {
        Self {
            dissector: NativeTlsDissector::new(),
            masker: PayloadMasker::new(),
            preserve: PreserveConfig::default(),
            is_tls: true,
            scratch_dir: None,
        }
    }
}

impl MaskingStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the file-wide `KeepRuleSet`: runs the TLS marker when
    /// `mask.protocol == "tls"`, otherwise falls back to the empty,
    /// default-deny set for any other configured protocol.
    fn build_rule_set(&self, input: &Path) -> KeepRuleSet {
        if self.is_tls {
            let marker = TLSProtocolMarker::new(&self.dissector, self.preserve.clone());
            marker.build_rule_set(input)
        } else {
            debug!("mask.protocol is not tls; masking all TCP payload by default-deny");
            KeepRuleSet::new(Vec::new())
        }
    }

    fn write_keep_rules_diagnostic(&self, rule_set: &KeepRuleSet) {
        let Some(dir) = &self.scratch_dir else {
            return;
        };
        match serde_json::to_vec_pretty(rule_set) {
            Ok(json) => {
                if let Err(e) = std::fs::write(dir.join("keep_rules.json"), json) {
                    debug!(error = %e, "failed to write keep_rules.json diagnostic copy");
                }
            }
            Err(e) => debug!(error = %e, "failed to serialize keep rule set for diagnostics"),
        }
    }
}

impl Stage for MaskingStage {
    fn name(&self) -> &'static str {
        "mask"
    }

    fn is_enabled(&self, config: &PipelineConfig) -> bool {
        config.mask.enabled
    }

    fn configure(&mut self, config: &PipelineConfig) {
        self.preserve = config.mask.preserve.clone();
        self.is_tls = config.mask.is_tls();
    }

    fn begin_file(&mut self) {
        self.masker.begin_file();
    }

    fn set_file_scratch_dir(&mut self, dir: Option<&Path>) {
        self.scratch_dir = dir.map(Path::to_path_buf);
    }

    fn process(&mut self, input: &Path, output: &Path) -> Result<StageStats, StageError> {
        let rule_set = self.build_rule_set(input);
        self.write_keep_rules_diagnostic(&rule_set);

        // A structurally invalid rule set fails the whole file; this is the
        // only way `MaskingStage::process` can fail outright.
        let index = PayloadMasker::build_index(&rule_set)?;

        let mut reader = PcapReader::open(input)?;
        let format = peek_format(input)?;
        let mut writer = PcapWriter::create(output, format, reader.link_type(), reader.snaplen())?;

        let mut stats = StageStats::default();
        let mut parse_skipped: u64 = 0;

        while let Some(mut packet) = reader.next_packet()? {
            stats.packets_in += 1;
            match self.masker.mask_packet(&mut packet.data, &index) {
                MaskOutcome::Modified => stats.packets_modified += 1,
                MaskOutcome::NotApplicable => parse_skipped += 1,
                MaskOutcome::Unmodified => {}
            }
            writer.write_packet(&packet)?;
            stats.packets_out += 1;
        }
        writer.flush()?;

        stats.set_extra("parse_skipped", parse_skipped);
        stats.set_extra("rules_in_set", rule_set.stats.total_rules as u64);
        stats.set_extra("streams_covered", rule_set.stats.streams_covered as u64);

        Ok(stats)
    }
}
