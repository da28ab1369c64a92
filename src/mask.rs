//! `PayloadMasker`: the default-deny engine that rewrites TCP payload bytes
//! according to a `KeepRuleSet`. Pure packet-rewriting logic; file I/O and
//! dissector wiring live in `stages::mask::MaskingStage`.

use std::collections::HashMap;

use crate::checksum;
use crate::encap::EncapsulationParser;
use crate::error::MaskError;
use crate::flow::{FlowIdentifier, SequenceSpace};
use crate::netutil;
use crate::types::{Direction, KeepRuleSet, KeepStrategy, LayerKind, StreamId};

/// Sorted, binary-searchable ranges for one `(StreamId, Direction)`, split
/// by strategy during preprocessing: `header_only` ranges are kept exactly
/// as given (never merged), `full_preserve` ranges are sorted and merged
/// when touching or overlapping.
#[derive(Debug, Default)]
pub(crate) struct GroupIndex {
    header_only: Vec<(u64, u64)>,
    full_preserve: Vec<(u64, u64)>,
}

/// Built once per file from a `KeepRuleSet`, then consulted for every packet.
pub(crate) type MaskIndex = HashMap<(StreamId, Direction), GroupIndex>;

fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_by_key(|r| r.0);
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

/// Ranges from `ranges` overlapping the half-open interval `[start, end)`.
fn overlapping<'a>(ranges: &'a [(u64, u64)], start: u64, end: u64) -> impl Iterator<Item = (u64, u64)> + 'a {
    // `ranges` is sorted by start; a linear scan is simple and fine at the
    // per-file rule counts this crate expects (a few hundred at most).
    ranges
        .iter()
        .copied()
        .filter(move |&(s, e)| s < end && e > start)
}

pub struct PayloadMasker {
    flows: FlowIdentifier,
    seqs: SequenceSpace,
}

/// What happened to one packet when it was run through the masker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOutcome {
    /// No TCP payload to mask (not a TCP packet, or an empty segment).
    NotApplicable,
    /// Had a payload but the masked bytes are identical to the original.
    Unmodified,
    /// Payload bytes were rewritten in place.
    Modified,
}

impl PayloadMasker {
    pub fn new() -> Self {
        Self {
            flows: FlowIdentifier::new(),
            seqs: SequenceSpace::new(),
        }
    }

    /// Resets Masker-owned per-file state: the stream-id cache, flow
    /// directions, and sequence-space tracking.
    pub fn begin_file(&mut self) {
        self.flows.reset();
        self.seqs.reset();
    }

    /// Groups, splits and merges `rule_set`'s rules into a lookup structure.
    /// Fails the whole file if the rule set itself is structurally invalid.
    pub(crate) fn build_index(rule_set: &KeepRuleSet) -> Result<MaskIndex, MaskError> {
        if !rule_set.is_well_formed() {
            return Err(MaskError::RuleInvariantViolation(
                "keep rule set violates half-open/ordering invariants".to_string(),
            ));
        }

        let mut raw: HashMap<(StreamId, Direction), (Vec<(u64, u64)>, Vec<(u64, u64)>)> = HashMap::new();
        for rule in &rule_set.rules {
            let entry = raw.entry((rule.stream_id.clone(), rule.direction)).or_default();
            match rule.strategy {
                KeepStrategy::HeaderOnly => entry.0.push((rule.seq_start, rule.seq_end)),
                KeepStrategy::FullPreserve => entry.1.push((rule.seq_start, rule.seq_end)),
            }
        }

        let index = raw
            .into_iter()
            .map(|(key, (header_only, full_preserve))| {
                (
                    key,
                    GroupIndex {
                        header_only,
                        full_preserve: merge_ranges(full_preserve),
                    },
                )
            })
            .collect();
        Ok(index)
    }

    /// Masks one packet's TCP payload in place against `index`, built once
    /// per file by `build_index`.
    pub(crate) fn mask_packet(&mut self, data: &mut [u8], index: &MaskIndex) -> MaskOutcome {
        let layers = EncapsulationParser::parse(data);
        let Some(info) = self.flows.identify(data, &layers) else {
            return MaskOutcome::NotApplicable;
        };
        if info.payload_len == 0 {
            return MaskOutcome::NotApplicable;
        }

        let seq_start = self.seqs.logical(&info.stream_id, info.direction, info.seq32);
        let seq_end = seq_start + info.payload_len as u64;
        let key = (info.stream_id.clone(), info.direction);

        let mut buffer = vec![0u8; info.payload_len];
        let mut preserved = vec![false; info.payload_len];

        if let Some(group) = index.get(&key) {
            for (s, e) in overlapping(&group.header_only, seq_start, seq_end) {
                apply_range(data, info.payload_offset, seq_start, &mut buffer, &mut preserved, s, e);
            }
            for (s, e) in overlapping(&group.full_preserve, seq_start, seq_end) {
                apply_range(data, info.payload_offset, seq_start, &mut buffer, &mut preserved, s, e);
            }
        }

        let original = &data[info.payload_offset..info.payload_offset + info.payload_len];
        if buffer == original {
            return MaskOutcome::Unmodified;
        }

        data[info.payload_offset..info.payload_offset + info.payload_len].copy_from_slice(&buffer);
        self.refix_tcp_checksum(data, &layers, info.payload_offset + info.payload_len);
        MaskOutcome::Modified
    }

    fn refix_tcp_checksum(&self, data: &mut [u8], layers: &crate::types::LayerStack, payload_end: usize) {
        let Some(ip_layer) = netutil::innermost_ip_layer(layers) else {
            return;
        };
        let Some((src, dst)) = netutil::ip_addrs(data, ip_layer) else {
            return;
        };
        let Some(tcp) = layers.find(LayerKind::Tcp) else {
            return;
        };
        checksum::fix_tcp_checksum(src, dst, &mut data[tcp.byte_offset..payload_end]);
    }
}

impl Default for PayloadMasker {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies original payload bytes covering `[s, e)` (absolute sequence
/// space) into `buffer`'s corresponding positions and marks them preserved,
/// but only for positions not already preserved - a `header_only` pass
/// marking something preserved is final, and a later `full_preserve` pass
/// must not touch it, as enforced by callers always running header_only
/// first and checking `preserved` here either way.
fn apply_range(
    data: &[u8],
    payload_offset: usize,
    seq_start: u64,
    buffer: &mut [u8],
    preserved: &mut [bool],
    range_start: u64,
    range_end: u64,
) {
    let clip_start = range_start.max(seq_start);
    let clip_end = range_end.min(seq_start + buffer.len() as u64);
    if clip_end <= clip_start {
        return;
    }
    let local_start = (clip_start - seq_start) as usize;
    let local_end = (clip_end - seq_start) as usize;
    for i in local_start..local_end {
        if preserved[i] {
            continue;
        }
        buffer[i] = data[payload_offset + i];
        preserved[i] = true;
    }
}
