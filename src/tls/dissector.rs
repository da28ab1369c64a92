//! `NativeTlsDissector`: reassembles each TCP stream direction in a capture
//! file and walks the reassembled bytes for valid-looking TLS records. This
//! stands in for an external `tshark`-like dissection process behind the
//! same trait boundary, as an in-process implementation.

use std::collections::BTreeMap;
use std::path::Path;

use crate::encap::EncapsulationParser;
use crate::error::DissectorError;
use crate::flow::{FlowIdentifier, SequenceSpace};
use crate::pcap_io::PcapReader;
use crate::tls::is_plausible_tls_header;
use crate::types::{Direction, Packet, StreamId};

use byteorder::{BigEndian, ByteOrder};

/// One validated TLS record, in logical (wraparound-adjusted) sequence
/// space. A record's byte range is `[seq_start, seq_start + 5 + length)`.
#[derive(Debug, Clone)]
pub struct DissectedRecord {
    pub stream_id: StreamId,
    pub direction: Direction,
    pub seq_start: u64,
    pub content_type: u8,
    pub version: u16,
    /// Body length only, excluding the 5-byte record header.
    pub length: u16,
    /// True if this record's extent was derived from declared length alone
    /// rather than from a fully reassembled, gap-free run.
    pub approximate_extent: bool,
}

impl DissectedRecord {
    pub fn byte_range(&self) -> std::ops::Range<u64> {
        let start = self.seq_start;
        let end = start + crate::tls::TLS_RECORD_HEADER_LEN + self.length as u64;
        start..end
    }
}

/// The seam behind which a dissection implementation can be swapped, per the
/// design notes: a test double stands in for whatever performs real TCP
/// reassembly and TLS parsing.
pub trait TLSDissector {
    fn analyse(&self, path: &Path) -> Result<Vec<DissectedRecord>, DissectorError>;
}

#[derive(Debug, Default)]
pub struct NativeTlsDissector;

impl NativeTlsDissector {
    pub fn new() -> Self {
        Self
    }

    /// Core reassembly + record-walk logic, taking packets directly rather
    /// than a file path - lets tests exercise it against synthetic packets
    /// without writing a capture to disk.
    pub fn analyse_packets<'a>(
        &self,
        packets: impl IntoIterator<Item = &'a Packet>,
    ) -> Vec<DissectedRecord> {
        let mut flows = FlowIdentifier::new();
        let mut seqs = SequenceSpace::new();

        // Raw TCP payload segments per (stream, direction), keyed by their
        // logical sequence start, collected in one pass over the packets.
        let mut segments: BTreeMap<(StreamId, Direction), BTreeMap<u64, Vec<u8>>> = BTreeMap::new();

        for packet in packets {
            let layers = EncapsulationParser::parse(&packet.data);
            let Some(info) = flows.identify(&packet.data, &layers) else {
                continue;
            };
            if info.payload_len == 0 {
                continue;
            }
            let seq_start = seqs.logical(&info.stream_id, info.direction, info.seq32);
            let payload =
                packet.data[info.payload_offset..info.payload_offset + info.payload_len].to_vec();
            segments
                .entry((info.stream_id, info.direction))
                .or_default()
                .insert(seq_start, payload);
        }

        let mut records = Vec::new();
        for ((stream_id, direction), by_seq) in segments {
            for run in contiguous_runs(by_seq) {
                walk_records(&stream_id, direction, &run, &mut records);
            }
        }
        records
    }
}

impl TLSDissector for NativeTlsDissector {
    fn analyse(&self, path: &Path) -> Result<Vec<DissectedRecord>, DissectorError> {
        let mut reader = PcapReader::open(path)
            .map_err(|e| DissectorError::Unavailable(e.to_string()))?;
        let mut packets = Vec::new();
        loop {
            match reader.next_packet() {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => break,
                Err(e) => return Err(DissectorError::Unavailable(e.to_string())),
            }
        }
        Ok(self.analyse_packets(packets.iter()))
    }
}

/// One maximal run of contiguous bytes in logical sequence space, built from
/// segments that may have arrived out of order but not necessarily without
/// gaps.
struct Run {
    start: u64,
    bytes: Vec<u8>,
}

fn contiguous_runs(by_seq: BTreeMap<u64, Vec<u8>>) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current: Option<Run> = None;

    for (seq_start, bytes) in by_seq {
        match &mut current {
            Some(run) if run.start + run.bytes.len() as u64 == seq_start => {
                run.bytes.extend_from_slice(&bytes);
            }
            Some(run) if run.start + run.bytes.len() as u64 > seq_start => {
                // Retransmission/overlap: bytes already covered, drop the
                // overlapping prefix and append whatever is new.
                let covered = run.start + run.bytes.len() as u64;
                let overlap = (covered - seq_start) as usize;
                if overlap < bytes.len() {
                    run.bytes.extend_from_slice(&bytes[overlap..]);
                }
            }
            _ => {
                if let Some(finished) = current.take() {
                    runs.push(finished);
                }
                current = Some(Run {
                    start: seq_start,
                    bytes,
                });
            }
        }
    }
    if let Some(finished) = current {
        runs.push(finished);
    }
    runs
}

/// Walks `run` from its start, validating one TLS record header after
/// another, stopping at the first implausible header or when too few bytes
/// remain to confirm the next one.
fn walk_records(stream_id: &StreamId, direction: Direction, run: &Run, out: &mut Vec<DissectedRecord>) {
    let mut offset: usize = 0;
    while offset + 5 <= run.bytes.len() {
        let content_type = run.bytes[offset];
        let version = BigEndian::read_u16(&run.bytes[offset + 1..offset + 3]);
        let length = BigEndian::read_u16(&run.bytes[offset + 3..offset + 5]);

        if !is_plausible_tls_header(content_type, version, length) {
            break;
        }
        let record_total = 5 + length as usize;
        if offset + record_total > run.bytes.len() {
            // Header looks valid but the body hasn't fully arrived; stop
            // here rather than guess at where the next header would start.
            break;
        }

        out.push(DissectedRecord {
            stream_id: stream_id.clone(),
            direction,
            seq_start: run.start + offset as u64,
            content_type,
            version,
            length,
            approximate_extent: false,
        });
        offset += record_total;
    }
}
