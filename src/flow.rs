//! Assigns a stable `StreamId` and `Direction` to each TCP packet
//! (`FlowIdentifier`) and converts 32-bit TCP sequence numbers into a
//! monotonic 64-bit logical sequence per `(StreamId, Direction)`
//! (`SequenceSpace`). Both reset all state at the start of every file.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::netutil;
use crate::types::{Direction, FlowKey, L4Protocol, LayerKind, LayerStack, StreamId};

/// Everything the Masker (and, conceptually, a local-counter Marker) needs
/// about one TCP packet's place in its stream.
#[derive(Debug, Clone)]
pub struct TcpPacketInfo {
    pub stream_id: StreamId,
    pub direction: Direction,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq32: u32,
    pub payload_offset: usize,
    pub payload_len: usize,
}

#[derive(Debug, Clone, Copy)]
struct ForwardEndpoint {
    ip: IpAddr,
    port: u16,
}

/// Assigns stream ids by an incrementing counter keyed on the normalized
/// `FlowKey`, used when no external stream id is available. Reset between
/// files: a counter carried across files is the textbook way the
/// Marker/Masker stream-id invariant breaks.
#[derive(Debug, Default)]
pub struct FlowIdentifier {
    next_id: u64,
    stream_ids: HashMap<FlowKey, StreamId>,
    forward_endpoints: HashMap<StreamId, ForwardEndpoint>,
}

impl FlowIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.next_id = 0;
        self.stream_ids.clear();
        self.forward_endpoints.clear();
    }

    /// Looks up (or assigns) the `StreamId` for `flow_key`, the way the
    /// Masker does when it has no dissector-supplied id to prefer.
    fn stream_id_for(&mut self, flow_key: FlowKey) -> StreamId {
        if let Some(id) = self.stream_ids.get(&flow_key) {
            return id.clone();
        }
        let id = StreamId(self.next_id.to_string());
        self.next_id += 1;
        self.stream_ids.insert(flow_key, id.clone());
        id
    }

    fn direction_for(&mut self, stream_id: &StreamId, src_ip: IpAddr, src_port: u16) -> Direction {
        match self.forward_endpoints.get(stream_id) {
            Some(fwd) if fwd.ip == src_ip && fwd.port == src_port => Direction::Forward,
            Some(_) => Direction::Reverse,
            None => {
                self.forward_endpoints.insert(
                    stream_id.clone(),
                    ForwardEndpoint {
                        ip: src_ip,
                        port: src_port,
                    },
                );
                Direction::Forward
            }
        }
    }

    /// Extracts flow/direction/sequence information for one TCP packet.
    /// Returns `None` if the packet has no TCP layer (not an error - the
    /// caller just skips flow-dependent processing for it).
    pub fn identify(&mut self, data: &[u8], layers: &LayerStack) -> Option<TcpPacketInfo> {
        let tcp = layers.find(LayerKind::Tcp)?;
        let ip = netutil::innermost_ip_layer(layers)?;
        let (src_ip, dst_ip) = netutil::ip_addrs(data, ip)?;
        let src_port = netutil::tcp_src_port(data, tcp);
        let dst_port = netutil::tcp_dst_port(data, tcp);
        let seq32 = netutil::tcp_seq32(data, tcp);

        let flow_key = FlowKey::new(L4Protocol::Tcp, (src_ip, src_port), (dst_ip, dst_port));
        let stream_id = self.stream_id_for(flow_key);
        let direction = self.direction_for(&stream_id, src_ip, src_port);

        let (payload_offset, payload_len) = layers
            .payload()
            .map(|p| (p.byte_offset, p.byte_length))
            .unwrap_or((tcp.end(), 0));

        Some(TcpPacketInfo {
            stream_id,
            direction,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            seq32,
            payload_offset,
            payload_len,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SeqState {
    last_seq32: u32,
    epoch: u64,
    initialized: bool,
}

/// Per `(StreamId, Direction)` wraparound tracker: `logical = (epoch << 32)
/// | seq32`, with `epoch` incremented whenever the new sequence number
/// looks like it has wrapped around relative to the last one seen.
#[derive(Debug, Default)]
pub struct SequenceSpace {
    state: HashMap<(StreamId, Direction), SeqState>,
}

impl SequenceSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }

    pub fn logical(&mut self, stream_id: &StreamId, direction: Direction, seq32: u32) -> u64 {
        let key = (stream_id.clone(), direction);
        let state = self.state.entry(key).or_insert(SeqState::default());

        if state.initialized {
            let backward_gap = state.last_seq32.wrapping_sub(seq32);
            if backward_gap > (1u32 << 31) {
                state.epoch += 1;
            }
        }
        state.last_seq32 = seq32;
        state.initialized = true;

        (state.epoch << 32) | (seq32 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_then_reverse_direction() {
        let mut fi = FlowIdentifier::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let key = FlowKey::new(L4Protocol::Tcp, (a, 1000), (b, 80));
        let id1 = fi.stream_id_for(key);
        let d1 = fi.direction_for(&id1, a, 1000);
        let d2 = fi.direction_for(&id1, b, 80);
        assert_eq!(d1, Direction::Forward);
        assert_eq!(d2, Direction::Reverse);
    }

    #[test]
    fn reset_clears_counters() {
        let mut fi = FlowIdentifier::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let key = FlowKey::new(L4Protocol::Tcp, (a, 1000), (b, 80));
        let id1 = fi.stream_id_for(key);
        fi.reset();
        let id2 = fi.stream_id_for(key);
        assert_eq!(id1, id2, "first stream in any file is always id 0");
    }

    #[test]
    fn sequence_space_tracks_wraparound() {
        let mut seq = SequenceSpace::new();
        let stream = StreamId("0".to_string());
        let l1 = seq.logical(&stream, Direction::Forward, 0xFFFFFE00);
        let l2 = seq.logical(&stream, Direction::Forward, 0x00000100);
        assert!(l2 > l1, "logical sequence must increase across a wraparound");
        assert_eq!(l2 - l1, 0x300);
    }

    #[test]
    fn no_false_wraparound_on_ordinary_forward_progress() {
        let mut seq = SequenceSpace::new();
        let stream = StreamId("0".to_string());
        let l1 = seq.logical(&stream, Direction::Forward, 1000);
        let l2 = seq.logical(&stream, Direction::Forward, 2000);
        assert_eq!(l2 - l1, 1000);
    }
}
