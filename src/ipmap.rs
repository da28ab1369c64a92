//! Process-wide, prefix-preserving IP pseudonymization shared across every
//! file in one run. IPv4 and IPv6 live in independent namespaces,
//! each backed by a lazily-grown binary trie: every node carries one random
//! bit, assigned the first time a walk passes through it, and an address's
//! pseudonym is produced by XOR-walking the address's bits against the
//! nodes on its path. Two addresses sharing an N-bit prefix walk through
//! the same first N nodes, so their pseudonyms share the same N-bit prefix.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::netutil::is_exempt_from_anonymization;

struct TrieNode {
    bit: bool,
    children: [Option<Box<TrieNode>>; 2],
}

impl TrieNode {
    fn new_random(rng: &mut StdRng) -> Self {
        Self {
            bit: rng.gen(),
            children: [None, None],
        }
    }
}

struct Trie {
    root: TrieNode,
}

impl Trie {
    fn new(rng: &mut StdRng) -> Self {
        Self {
            root: TrieNode::new_random(rng),
        }
    }

    /// XOR-walks `bits` (most-significant first) against the trie, growing
    /// it as needed, and returns the pseudonymized bits in the same order.
    fn walk(&mut self, bits: &[bool], rng: &mut StdRng) -> Vec<bool> {
        let mut node = &mut self.root;
        let mut out = Vec::with_capacity(bits.len());
        for &b in bits {
            out.push(b ^ node.bit);
            let idx = b as usize;
            if node.children[idx].is_none() {
                node.children[idx] = Some(Box::new(TrieNode::new_random(rng)));
            }
            node = node.children[idx].as_mut().expect("just inserted");
        }
        out
    }
}

fn u32_to_bits(mut v: u32) -> [bool; 32] {
    let mut bits = [false; 32];
    for i in (0..32).rev() {
        bits[i] = v & 1 != 0;
        v >>= 1;
    }
    bits
}

fn bits_to_u32(bits: &[bool]) -> u32 {
    bits.iter().fold(0u32, |acc, &b| (acc << 1) | (b as u32))
}

fn u128_to_bits(mut v: u128) -> [bool; 128] {
    let mut bits = [false; 128];
    for i in (0..128).rev() {
        bits[i] = v & 1 != 0;
        v >>= 1;
    }
    bits
}

fn bits_to_u128(bits: &[bool]) -> u128 {
    bits.iter().fold(0u128, |acc, &b| (acc << 1) | (b as u128))
}

struct Inner {
    v4_trie: Trie,
    v6_trie: Trie,
    v4_cache: HashMap<Ipv4Addr, Ipv4Addr>,
    v6_cache: HashMap<Ipv6Addr, Ipv6Addr>,
    rng: StdRng,
}

/// Shared across every file processed by one `PipelineExecutor` run; reset
/// only ever happens by constructing a new `IpMapping`, never per-file.
pub struct IpMapping {
    inner: RwLock<Inner>,
}

impl IpMapping {
    pub fn new() -> Self {
        let mut rng = StdRng::from_entropy();
        let v4_trie = Trie::new(&mut rng);
        let v6_trie = Trie::new(&mut rng);
        Self {
            inner: RwLock::new(Inner {
                v4_trie,
                v6_trie,
                v4_cache: HashMap::new(),
                v6_cache: HashMap::new(),
                rng,
            }),
        }
    }

    /// Maps `addr` to its pseudonym, passing exempt addresses (broadcast,
    /// multicast, loopback, link-local, unspecified) through unchanged.
    pub fn pseudonymize(&self, addr: IpAddr) -> IpAddr {
        if is_exempt_from_anonymization(addr) {
            return addr;
        }
        match addr {
            IpAddr::V4(v4) => IpAddr::V4(self.pseudonymize_v4(v4)),
            IpAddr::V6(v6) => IpAddr::V6(self.pseudonymize_v6(v6)),
        }
    }

    fn pseudonymize_v4(&self, addr: Ipv4Addr) -> Ipv4Addr {
        if let Some(&mapped) = self.inner.read().v4_cache.get(&addr) {
            return mapped;
        }
        let mut inner = self.inner.write();
        if let Some(&mapped) = inner.v4_cache.get(&addr) {
            return mapped;
        }
        let bits = u32_to_bits(u32::from(addr));
        let Inner { v4_trie, rng, .. } = &mut *inner;
        let out_bits = v4_trie.walk(&bits, rng);
        let mapped = Ipv4Addr::from(bits_to_u32(&out_bits));
        inner.v4_cache.insert(addr, mapped);
        mapped
    }

    fn pseudonymize_v6(&self, addr: Ipv6Addr) -> Ipv6Addr {
        if let Some(&mapped) = self.inner.read().v6_cache.get(&addr) {
            return mapped;
        }
        let mut inner = self.inner.write();
        if let Some(&mapped) = inner.v6_cache.get(&addr) {
            return mapped;
        }
        let bits = u128_to_bits(u128::from(addr));
        let Inner { v6_trie, rng, .. } = &mut *inner;
        let out_bits = v6_trie.walk(&bits, rng);
        let mapped = Ipv6Addr::from(bits_to_u128(&out_bits));
        inner.v6_cache.insert(addr, mapped);
        mapped
    }

    /// Pre-scans: ensures a mapping entry exists for every address in
    /// `addrs` without returning anything. Populating the cache early only
    /// changes timing, never the prefix-preservation property.
    pub fn warm(&self, addrs: impl IntoIterator<Item = IpAddr>) {
        for addr in addrs {
            self.pseudonymize(addr);
        }
    }
}

impl Default for IpMapping {
    fn default() -> Self {
        Self::new()
    }
}

fn shared_prefix_len_v4(a: Ipv4Addr, b: Ipv4Addr) -> u32 {
    (u32::from(a) ^ u32::from(b)).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_within_one_mapping() {
        let map = IpMapping::new();
        let a: IpAddr = "192.168.1.5".parse().unwrap();
        let p1 = map.pseudonymize(a);
        let p2 = map.pseudonymize(a);
        assert_eq!(p1, p2);
    }

    #[test]
    fn distinct_inputs_map_to_distinct_outputs() {
        let map = IpMapping::new();
        let a: IpAddr = "10.1.5.197".parse().unwrap();
        let b: IpAddr = "10.171.240.102".parse().unwrap();
        assert_ne!(map.pseudonymize(a), map.pseudonymize(b));
    }

    #[test]
    fn prefix_sharing_is_preserved_ipv4() {
        let map = IpMapping::new();
        let a: Ipv4Addr = "10.1.5.197".parse().unwrap();
        let b: Ipv4Addr = "10.1.5.198".parse().unwrap();
        let c: Ipv4Addr = "10.1.5.43".parse().unwrap();
        let d: Ipv4Addr = "10.171.240.102".parse().unwrap();

        let pa = map.pseudonymize_v4(a);
        let pb = map.pseudonymize_v4(b);
        let pc = map.pseudonymize_v4(c);
        let pd = map.pseudonymize_v4(d);

        // a, b, c share a /24 in the input; their pseudonyms must share it too.
        assert!(shared_prefix_len_v4(pa, pb) >= 24);
        assert!(shared_prefix_len_v4(pa, pc) >= 24);
        // all four share only a /8 in the input.
        assert!(shared_prefix_len_v4(pa, pd) >= 8);
    }

    #[test]
    fn exempt_addresses_pass_through() {
        let map = IpMapping::new();
        let broadcast: IpAddr = "255.255.255.255".parse().unwrap();
        let multicast: IpAddr = "224.0.0.1".parse().unwrap();
        let loopback: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(map.pseudonymize(broadcast), broadcast);
        assert_eq!(map.pseudonymize(multicast), multicast);
        assert_eq!(map.pseudonymize(loopback), loopback);
    }
}
