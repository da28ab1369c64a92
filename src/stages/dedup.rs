//! Deduplication: no state carries over between files. Drops a packet
//! if an earlier packet in the same file had the exact same bytes; the
//! first copy of any duplicate always survives, and relative order of the
//! packets that remain is preserved.

use ahash::{AHashMap, RandomState};
use std::hash::{BuildHasher, Hasher};

use std::path::Path;

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::pcap_io::{peek_format, PcapReader, PcapWriter};
use crate::stages::{Stage, StageStats};

/// A 64-bit ahash digest is used as a bucket key; full bytes are kept per
/// bucket and compared on every hit, so a hash collision never causes a
/// false duplicate to be dropped.
pub struct DeduplicationStage {
    hasher_state: RandomState,
    seen: AHashMap<u64, Vec<Vec<u8>>>,
}

impl Default for DeduplicationStage {
    fn default() -> Self {
        Self {
            hasher_state: RandomState::with_seeds(0, 0, 0, 0),
            seen: AHashMap::new(),
        }
    }
}

impl DeduplicationStage {
    pub fn new() -> Self {
        Self::default()
    }

    fn hash_of(&self, data: &[u8]) -> u64 {
        let mut hasher = self.hasher_state.build_hasher();
        hasher.write(data);
        hasher.finish()
    }

    fn is_duplicate(&mut self, data: &[u8]) -> bool {
        let hash = self.hash_of(data);
        let bucket = self.seen.entry(hash).or_default();
        if bucket.iter().any(|seen| seen.as_slice() == data) {
            return true;
        }
        bucket.push(data.to_vec());
        false
    }
}

impl Stage for DeduplicationStage {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn is_enabled(&self, config: &PipelineConfig) -> bool {
        config.dedup.enabled
    }

    fn begin_file(&mut self) {
        self.seen.clear();
    }

    fn process(&mut self, input: &Path, output: &Path) -> Result<StageStats, StageError> {
        let mut reader = PcapReader::open(input)?;
        let format = peek_format(input)?;
        let mut writer = PcapWriter::create(output, format, reader.link_type(), reader.snaplen())?;

        let mut stats = StageStats::default();
        let mut duplicates_removed: u64 = 0;

        while let Some(packet) = reader.next_packet()? {
            stats.packets_in += 1;
            if self.is_duplicate(&packet.data) {
                duplicates_removed += 1;
                continue;
            }
            writer.write_packet(&packet)?;
            stats.packets_out += 1;
        }
        writer.flush()?;

        stats.set_extra("duplicates_removed", duplicates_removed);
        Ok(stats)
    }
}
