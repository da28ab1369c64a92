pub mod checksum;
pub mod config;
pub mod encap;
pub mod error;
pub mod events;
pub mod flow;
pub mod ipmap;
pub mod marker;
pub mod mask;
pub mod netutil;
pub mod pcap_io;
pub mod pipeline;
pub mod stages;
pub mod tls;
pub mod types;

// Re-export commonly used public API
pub use config::{AnonConfig, DedupConfig, MaskConfig, PipelineConfig, PreserveConfig};
pub use error::{ErrorKind, StageError};
pub use events::{ErrorScope, Event, EventSink, NullSink};
pub use pcap_io::{PcapReader, PcapWriter};
pub use pipeline::{FileJob, IoPolicy, PipelineExecutor, RunSummary};
pub use types::{KeepRule, KeepRuleSet, KeepStrategy, Packet};
