use std::net::IpAddr;
use std::time::SystemTime;

/// Link-layer type of a capture, as recorded by pcap/pcapng (LINKTYPE_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    Raw,
    Other(u32),
}

/// One packet as read off the wire: raw bytes plus capture metadata. Never
/// mutated in place - stages that need to change bytes build a new `Packet`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
    pub orig_len: u32,
    pub link_type: LinkType,
}

impl Packet {
    pub fn new(data: Vec<u8>, timestamp: SystemTime, orig_len: u32, link_type: LinkType) -> Self {
        Self {
            data,
            timestamp,
            orig_len,
            link_type,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Eth,
    Vlan,
    Mpls,
    Gre,
    Vxlan,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Payload,
}

/// One layer found while walking a packet's encapsulation stack.
#[derive(Debug, Clone, Copy)]
pub struct LayerDescriptor {
    pub kind: LayerKind,
    pub byte_offset: usize,
    pub byte_length: usize,
}

impl LayerDescriptor {
    pub fn end(&self) -> usize {
        self.byte_offset + self.byte_length
    }
}

/// Ordered list of layers discovered by `EncapsulationParser`, innermost last.
/// Offsets are strictly monotonic and the final payload span never runs past
/// the packet's own length.
#[derive(Debug, Clone, Default)]
pub struct LayerStack(pub Vec<LayerDescriptor>);

impl LayerStack {
    pub fn push(&mut self, layer: LayerDescriptor) {
        self.0.push(layer);
    }

    pub fn find(&self, kind: LayerKind) -> Option<&LayerDescriptor> {
        self.0.iter().find(|l| l.kind == kind)
    }

    pub fn rfind(&self, kind: LayerKind) -> Option<&LayerDescriptor> {
        self.0.iter().rev().find(|l| l.kind == kind)
    }

    pub fn all(&self, kind: LayerKind) -> impl Iterator<Item = &LayerDescriptor> {
        self.0.iter().filter(move |l| l.kind == kind)
    }

    pub fn payload(&self) -> Option<&LayerDescriptor> {
        self.find(LayerKind::Payload)
    }

    /// Checks the two structural invariants every `LayerStack` must satisfy.
    pub fn is_well_formed(&self, packet_len: usize) -> bool {
        let monotonic = self
            .0
            .windows(2)
            .all(|w| w[0].byte_offset <= w[1].byte_offset);
        let payload_in_bounds = self
            .payload()
            .map(|p| p.end() <= packet_len)
            .unwrap_or(true);
        monotonic && payload_in_bounds
    }
}

/// Normalized innermost 5-tuple identifying a flow independent of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub protocol: L4Protocol,
    pub addr_a: IpAddr,
    pub port_a: u16,
    pub addr_b: IpAddr,
    pub port_b: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Protocol {
    Tcp,
    Udp,
}

impl FlowKey {
    /// Builds a direction-independent key: the two endpoints are ordered so
    /// that the same flow always normalizes to the same key regardless of
    /// which packet (forward or reverse) it was built from.
    pub fn new(protocol: L4Protocol, src: (IpAddr, u16), dst: (IpAddr, u16)) -> Self {
        if (src.0, src.1) <= (dst.0, dst.1) {
            Self {
                protocol,
                addr_a: src.0,
                port_a: src.1,
                addr_b: dst.0,
                port_b: dst.1,
            }
        } else {
            Self {
                protocol,
                addr_a: dst.0,
                port_a: dst.1,
                addr_b: src.0,
                port_b: src.1,
            }
        }
    }
}

/// Stable per-file identifier for a TCP stream. Sourced identically by the
/// Marker and the Masker - see the design notes on stream-id consistency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(pub String);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "fwd"),
            Direction::Reverse => write!(f, "rev"),
        }
    }
}

/// Canonical key used by both Marker and Masker to index per-stream state.
/// Recommended form from the design notes: `"{stream_id}:{direction}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamDirection(pub String);

impl StreamDirection {
    pub fn new(stream_id: &StreamId, direction: Direction) -> Self {
        Self(format!("{}:{}", stream_id.0, direction))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KeepStrategy {
    HeaderOnly,
    FullPreserve,
}

/// One preserved byte range within one stream direction's logical sequence
/// space. `seq_end` is exclusive (half-open interval).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KeepRule {
    pub stream_id: StreamId,
    pub direction: Direction,
    pub seq_start: u64,
    pub seq_end: u64,
    pub strategy: KeepStrategy,
    pub metadata: KeepRuleMetadata,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KeepRuleMetadata {
    pub content_type: Option<u8>,
    /// Set when the rule's extent came from the approximate `spans_packets`
    /// fallback rather than dissector-confirmed reassembly.
    pub approximate_extent: bool,
}

impl KeepRule {
    pub fn len(&self) -> u64 {
        self.seq_end - self.seq_start
    }

    /// The two structural invariants every `KeepRule` must satisfy, plus the
    /// header-only length constraint.
    pub fn is_well_formed(&self) -> bool {
        if self.seq_end <= self.seq_start {
            return false;
        }
        if self.len() > (1u64 << 32) {
            return false;
        }
        if self.strategy == KeepStrategy::HeaderOnly && self.len() != 5 {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KeepRuleStats {
    pub total_rules: usize,
    pub streams_covered: usize,
}

/// Produced once by the Marker, consumed once by the Masker. Immutable.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KeepRuleSet {
    pub rules: Vec<KeepRule>,
    pub stats: KeepRuleStats,
}

impl KeepRuleSet {
    pub fn new(rules: Vec<KeepRule>) -> Self {
        let streams_covered = {
            let mut seen = std::collections::HashSet::new();
            for r in &rules {
                seen.insert(StreamDirection::new(&r.stream_id, r.direction));
            }
            seen.len()
        };
        let stats = KeepRuleStats {
            total_rules: rules.len(),
            streams_covered,
        };
        Self { rules, stats }
    }

    pub fn is_well_formed(&self) -> bool {
        self.rules.iter().all(KeepRule::is_well_formed)
    }
}
