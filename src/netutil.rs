//! Small shared helpers for pulling addresses and L4 header fields out of a
//! packet's `LayerStack`. Used by `flow`, `stages::anonymize`, and `mask` -
//! none of them re-derive layer offsets on their own.

use byteorder::{BigEndian, ByteOrder};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::types::{LayerDescriptor, LayerKind, LayerStack};

pub fn ipv4_src(data: &[u8], layer: &LayerDescriptor) -> Ipv4Addr {
    let o = layer.byte_offset;
    Ipv4Addr::new(data[o + 12], data[o + 13], data[o + 14], data[o + 15])
}

pub fn ipv4_dst(data: &[u8], layer: &LayerDescriptor) -> Ipv4Addr {
    let o = layer.byte_offset;
    Ipv4Addr::new(data[o + 16], data[o + 17], data[o + 18], data[o + 19])
}

pub fn ipv6_src(data: &[u8], layer: &LayerDescriptor) -> Ipv6Addr {
    let o = layer.byte_offset;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[o + 8..o + 24]);
    Ipv6Addr::from(octets)
}

pub fn ipv6_dst(data: &[u8], layer: &LayerDescriptor) -> Ipv6Addr {
    let o = layer.byte_offset;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[o + 24..o + 40]);
    Ipv6Addr::from(octets)
}

pub fn ip_addrs(data: &[u8], layer: &LayerDescriptor) -> Option<(IpAddr, IpAddr)> {
    match layer.kind {
        LayerKind::Ipv4 => Some((ipv4_src(data, layer).into(), ipv4_dst(data, layer).into())),
        LayerKind::Ipv6 => Some((ipv6_src(data, layer).into(), ipv6_dst(data, layer).into())),
        _ => None,
    }
}

pub fn set_ipv4_src(data: &mut [u8], layer: &LayerDescriptor, addr: Ipv4Addr) {
    let o = layer.byte_offset;
    data[o + 12..o + 16].copy_from_slice(&addr.octets());
}

pub fn set_ipv4_dst(data: &mut [u8], layer: &LayerDescriptor, addr: Ipv4Addr) {
    let o = layer.byte_offset;
    data[o + 16..o + 20].copy_from_slice(&addr.octets());
}

pub fn set_ipv6_src(data: &mut [u8], layer: &LayerDescriptor, addr: Ipv6Addr) {
    let o = layer.byte_offset;
    data[o + 8..o + 24].copy_from_slice(&addr.octets());
}

pub fn set_ipv6_dst(data: &mut [u8], layer: &LayerDescriptor, addr: Ipv6Addr) {
    let o = layer.byte_offset;
    data[o + 24..o + 40].copy_from_slice(&addr.octets());
}

/// All IP layers in the stack, outer to inner.
pub fn all_ip_layers(layers: &LayerStack) -> impl Iterator<Item = &LayerDescriptor> {
    layers
        .0
        .iter()
        .filter(|l| matches!(l.kind, LayerKind::Ipv4 | LayerKind::Ipv6))
}

/// The IP layer that directly encloses the innermost L4 header, i.e. the
/// one Anonymization must use to build the TCP/UDP pseudo-header and the
/// one Flow/Masking identify a stream from.
pub fn innermost_ip_layer(layers: &LayerStack) -> Option<&LayerDescriptor> {
    let l4_offset = layers.find(LayerKind::Tcp).or_else(|| layers.find(LayerKind::Udp))?.byte_offset;
    all_ip_layers(layers)
        .filter(|l| l.byte_offset < l4_offset)
        .max_by_key(|l| l.byte_offset)
}

pub fn tcp_src_port(data: &[u8], tcp: &LayerDescriptor) -> u16 {
    BigEndian::read_u16(&data[tcp.byte_offset..tcp.byte_offset + 2])
}

pub fn tcp_dst_port(data: &[u8], tcp: &LayerDescriptor) -> u16 {
    BigEndian::read_u16(&data[tcp.byte_offset + 2..tcp.byte_offset + 4])
}

pub fn tcp_seq32(data: &[u8], tcp: &LayerDescriptor) -> u32 {
    BigEndian::read_u32(&data[tcp.byte_offset + 4..tcp.byte_offset + 8])
}

/// Broadcast, multicast, loopback, link-local, and unspecified addresses -
/// Anonymization passes all of these through unchanged.
pub fn is_exempt_from_anonymization(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_multicast() || v6.is_loopback() || v6.is_unspecified(),
    }
}
