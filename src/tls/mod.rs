//! The TLS dissection boundary. `TLSDissector` is the trait seam a real
//! implementation and a test double both sit behind; `NativeTlsDissector`
//! is this crate's implementation, doing TCP reassembly and TLS record
//! parsing in-process rather than shelling out to an external tool.

pub mod dissector;

pub use dissector::{DissectedRecord, NativeTlsDissector, TLSDissector};

pub(crate) const TLS_VERSIONS: [u16; 5] = [0x0300, 0x0301, 0x0302, 0x0303, 0x0304];
pub(crate) const TLS_MAX_RECORD_LENGTH: u16 = (1 << 14) + 2048;
pub(crate) const TLS_RECORD_HEADER_LEN: u64 = 5;

pub(crate) fn is_plausible_tls_header(content_type: u8, version: u16, length: u16) -> bool {
    let _ = content_type; // any byte value is plausible for content_type
    TLS_VERSIONS.contains(&version) && length <= TLS_MAX_RECORD_LENGTH
}
