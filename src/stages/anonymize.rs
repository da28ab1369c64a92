//! Anonymization: replaces every IP address in every IP layer of
//! every packet with its prefix-preserving pseudonym, fixing up the IPv4
//! header checksum and any TCP/UDP checksum that covers the pseudo-header.
//! The actual mapping (`IpMapping`) is process-wide and shared across every
//! file in a run; this stage only owns the per-file sweep over packets.

use std::path::Path;
use std::sync::Arc;

use crate::checksum;
use crate::config::PipelineConfig;
use crate::encap::EncapsulationParser;
use crate::error::StageError;
use crate::ipmap::IpMapping;
use crate::netutil;
use crate::pcap_io::{peek_format, PcapReader, PcapWriter};
use crate::stages::{Stage, StageStats};
use crate::types::LayerKind;

pub struct AnonymizationStage {
    mapping: Arc<IpMapping>,
    pre_scan: bool,
}

impl AnonymizationStage {
    pub fn new(mapping: Arc<IpMapping>) -> Self {
        Self {
            mapping,
            pre_scan: false,
        }
    }

    /// Rewrites every IP layer's source and destination address in place,
    /// then re-derives any checksum that depended on them. Returns whether
    /// anything in `data` actually changed.
    fn anonymize_packet(&self, data: &mut [u8], layers: &crate::types::LayerStack) -> bool {
        let mut changed = false;

        for layer in netutil::all_ip_layers(layers) {
            match layer.kind {
                LayerKind::Ipv4 => {
                    let src = netutil::ipv4_src(data, layer);
                    let dst = netutil::ipv4_dst(data, layer);
                    let new_src = self.mapping.pseudonymize(src.into());
                    let new_dst = self.mapping.pseudonymize(dst.into());
                    if let (std::net::IpAddr::V4(ns), std::net::IpAddr::V4(nd)) = (new_src, new_dst) {
                        if ns != src || nd != dst {
                            changed = true;
                            netutil::set_ipv4_src(data, layer, ns);
                            netutil::set_ipv4_dst(data, layer, nd);
                            let header_len = ((data[layer.byte_offset] & 0x0f) as usize) * 4;
                            checksum::fix_ipv4_checksum(
                                &mut data[layer.byte_offset..layer.byte_offset + header_len],
                            );
                        }
                    }
                }
                LayerKind::Ipv6 => {
                    let src = netutil::ipv6_src(data, layer);
                    let dst = netutil::ipv6_dst(data, layer);
                    let new_src = self.mapping.pseudonymize(src.into());
                    let new_dst = self.mapping.pseudonymize(dst.into());
                    if let (std::net::IpAddr::V6(ns), std::net::IpAddr::V6(nd)) = (new_src, new_dst) {
                        if ns != src || nd != dst {
                            changed = true;
                            netutil::set_ipv6_src(data, layer, ns);
                            netutil::set_ipv6_dst(data, layer, nd);
                        }
                    }
                }
                _ => {}
            }
        }

        if changed {
            self.refix_l4_checksum(data, layers);
        }
        changed
    }

    fn refix_l4_checksum(&self, data: &mut [u8], layers: &crate::types::LayerStack) {
        let Some(ip_layer) = netutil::innermost_ip_layer(layers) else {
            return;
        };
        let Some((src, dst)) = netutil::ip_addrs(data, ip_layer) else {
            return;
        };
        // Bound the checksummed slice at the IP payload's own end, not the
        // end of the capture buffer - a frame padded to the Ethernet
        // minimum (or carrying a captured FCS) has trailing bytes past the
        // real TCP/UDP segment that must not be folded into the checksum
        // or counted in the pseudo-header length.
        let l4_end = layers.payload().map(|p| p.end()).unwrap_or(data.len());
        if let Some(tcp) = layers.find(LayerKind::Tcp) {
            checksum::fix_tcp_checksum(src, dst, &mut data[tcp.byte_offset..l4_end]);
        } else if let Some(udp) = layers.find(LayerKind::Udp) {
            checksum::fix_udp_checksum(src, dst, &mut data[udp.byte_offset..l4_end]);
        }
    }
}

impl Stage for AnonymizationStage {
    fn name(&self) -> &'static str {
        "anonymize"
    }

    fn is_enabled(&self, config: &PipelineConfig) -> bool {
        config.anon.enabled
    }

    fn configure(&mut self, config: &PipelineConfig) {
        self.pre_scan = config.anon.pre_scan;
    }

    fn begin_file(&mut self) {}

    fn process(&mut self, input: &Path, output: &Path) -> Result<StageStats, StageError> {
        let mut stats = StageStats::default();
        let mut addresses_seen: u64 = 0;

        // With pre_scan on, every address in the file is fed into the shared
        // mapping before any packet is rewritten, so the mapping's cache
        // doesn't grow while we're also holding the write path open - the
        // only effect is timing, never the resulting addresses.
        if self.pre_scan {
            let mut scan_reader = PcapReader::open(input)?;
            while let Some(packet) = scan_reader.next_packet()? {
                let layers = EncapsulationParser::parse(&packet.data);
                let addrs: Vec<_> = netutil::all_ip_layers(&layers)
                    .filter_map(|l| netutil::ip_addrs(&packet.data, l))
                    .flat_map(|(a, b)| [a, b])
                    .collect();
                self.mapping.warm(addrs);
            }
        }

        let mut reader = PcapReader::open(input)?;
        let format = peek_format(input)?;
        let mut writer = PcapWriter::create(output, format, reader.link_type(), reader.snaplen())?;

        while let Some(mut packet) = reader.next_packet()? {
            stats.packets_in += 1;
            let layers = EncapsulationParser::parse(&packet.data);
            let modified = self.anonymize_packet(&mut packet.data, &layers);
            if modified {
                stats.packets_modified += 1;
                addresses_seen += 1;
            }
            writer.write_packet(&packet)?;
            stats.packets_out += 1;
        }
        writer.flush()?;

        stats.set_extra("packets_with_rewritten_addresses", addresses_seen);
        Ok(stats)
    }
}
