//! End-to-end scenarios driving `PipelineExecutor` over synthetic, in-memory
//! pcaps - no checked-in binary fixtures. Each test builds its own capture,
//! runs the full (or a narrowed) pipeline, and inspects the rewritten bytes.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use pktmask_core::events::NullSink;
use pktmask_core::pcap_io::{CaptureFormat, PcapReader, PcapWriter};
use pktmask_core::types::{LinkType, Packet};
use pktmask_core::{FileJob, IoPolicy, PipelineConfig, PipelineExecutor};

const ETH_HDR_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_HDR_LEN: usize = 20;
const TCP_HDR_LEN: usize = 20;

/// Builds one Ethernet/(optional 802.1Q)/IPv4/TCP packet carrying `payload`.
/// Checksums are left zeroed; nothing here validates them, only the
/// structural layer walk and the masking/anonymization that follow.
fn build_tcp_packet(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
    seq: u32,
    vlan: Option<u16>,
    payload: &[u8],
) -> Vec<u8> {
    let vlan_len = if vlan.is_some() { VLAN_TAG_LEN } else { 0 };
    let total_len = ETH_HDR_LEN + vlan_len + IPV4_HDR_LEN + TCP_HDR_LEN + payload.len();
    let mut data = vec![0u8; total_len];

    let mut offset = 12;
    if let Some(tag) = vlan {
        data[offset..offset + 2].copy_from_slice(&0x8100u16.to_be_bytes());
        data[offset + 2..offset + 4].copy_from_slice(&tag.to_be_bytes());
        offset += VLAN_TAG_LEN;
    }
    data[offset..offset + 2].copy_from_slice(&0x0800u16.to_be_bytes());
    offset += 2;

    let ip_start = offset;
    data[ip_start] = 0x45;
    let ip_total_len = (IPV4_HDR_LEN + TCP_HDR_LEN + payload.len()) as u16;
    data[ip_start + 2..ip_start + 4].copy_from_slice(&ip_total_len.to_be_bytes());
    data[ip_start + 9] = 6; // TCP
    data[ip_start + 12..ip_start + 16].copy_from_slice(&src.octets());
    data[ip_start + 16..ip_start + 20].copy_from_slice(&dst.octets());

    let tcp_start = ip_start + IPV4_HDR_LEN;
    data[tcp_start..tcp_start + 2].copy_from_slice(&sport.to_be_bytes());
    data[tcp_start + 2..tcp_start + 4].copy_from_slice(&dport.to_be_bytes());
    data[tcp_start + 4..tcp_start + 8].copy_from_slice(&seq.to_be_bytes());
    data[tcp_start + 12] = 5 << 4; // data offset, no options

    let payload_start = tcp_start + TCP_HDR_LEN;
    data[payload_start..].copy_from_slice(payload);

    data
}

fn payload_offset(vlan: Option<u16>) -> usize {
    ETH_HDR_LEN + if vlan.is_some() { VLAN_TAG_LEN } else { 0 } + IPV4_HDR_LEN + TCP_HDR_LEN
}

fn tls_record(content_type: u8, body: &[u8]) -> Vec<u8> {
    let mut record = vec![content_type, 0x03, 0x03, 0, 0];
    record[3..5].copy_from_slice(&(body.len() as u16).to_be_bytes());
    record.extend_from_slice(body);
    record
}

fn write_pcap(path: &Path, frames: &[Vec<u8>]) {
    let mut writer = PcapWriter::create(path, CaptureFormat::Pcap, LinkType::Ethernet, 65535).unwrap();
    for frame in frames {
        writer
            .write_packet(&Packet::new(frame.clone(), SystemTime::UNIX_EPOCH, 0, LinkType::Ethernet))
            .unwrap();
    }
    writer.flush().unwrap();
}

fn read_all(path: &Path) -> Vec<Packet> {
    let reader = PcapReader::open(path).unwrap();
    reader.map(|r| r.unwrap()).collect()
}

/// A fresh uniquely-named temp directory; files inside get stable names so
/// scratch-dir derivation (file_stem-based) stays predictable.
fn test_dir() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut p = std::env::temp_dir();
    p.push(format!(
        "pktmask-core-e2e-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn common_prefix_len(a: Ipv4Addr, b: Ipv4Addr) -> u32 {
    (u32::from(a) ^ u32::from(b)).leading_zeros()
}

/// Scenario 1: a plain TLS session, 22 packets, mixed handshake and
/// application_data records in one direction of one stream.
#[test]
fn plain_tls_session_masks_application_data_and_preserves_handshake() {
    let dir = test_dir();
    let input = dir.join("capture.pcap");
    let output = dir.join("out.pcap");

    let src = Ipv4Addr::new(10, 1, 5, 197);
    let dst = Ipv4Addr::new(10, 1, 5, 43);

    let mut records: Vec<(bool, Vec<u8>)> = Vec::new(); // (is_handshake_like, record bytes)
    records.push((true, tls_record(22, &vec![0xAA; 100]))); // ClientHello
    records.push((true, tls_record(22, &vec![0xBB; 150]))); // ServerHello
    records.push((true, tls_record(20, &[0x01]))); // ChangeCipherSpec
    records.push((true, tls_record(22, &vec![0xCC; 40]))); // Finished
    for i in 0..18u8 {
        records.push((false, tls_record(23, &vec![i; 50]))); // ApplicationData
    }
    assert_eq!(records.len(), 22);

    let mut seq = 1000u32;
    let mut frames = Vec::new();
    for (_, record) in &records {
        frames.push(build_tcp_packet(src, dst, 51000, 443, seq, None, record));
        seq = seq.wrapping_add(record.len() as u32);
    }
    write_pcap(&input, &frames);

    let mut executor = PipelineExecutor::new(PipelineConfig::default());
    let io = IoPolicy::new(dir.join("scratch"), "scenario1".to_string());
    executor.run(&[FileJob::new(&input, &output)], &io, NullSink).unwrap();

    let out_packets = read_all(&output);
    assert_eq!(out_packets.len(), 22);

    let off = payload_offset(None);
    for (packet, (is_handshake_like, record)) in out_packets.iter().zip(records.iter()) {
        let payload = &packet.data[off..];
        if *is_handshake_like {
            assert_eq!(payload, record.as_slice(), "non-application_data records are preserved byte-for-byte");
        } else {
            assert_eq!(&payload[0..5], &record[0..5], "application_data header is preserved");
            assert!(payload[5..].iter().all(|&b| b == 0), "application_data body is masked");
        }
    }

    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 2: two application_data records packed into one 205-byte TCP
/// segment, at payload offsets 0 and 174 - exercises record-boundary
/// walking within a single segment.
#[test]
fn multiple_tls_records_in_one_segment_are_masked_independently() {
    let dir = test_dir();
    let input = dir.join("capture.pcap");
    let output = dir.join("out.pcap");

    let src = Ipv4Addr::new(10, 2, 0, 1);
    let dst = Ipv4Addr::new(10, 2, 0, 2);

    let record1 = tls_record(23, &vec![0x11; 169]); // 174 bytes total
    let record2 = tls_record(23, &vec![0x22; 26]); // 31 bytes total
    assert_eq!(record1.len(), 174);
    assert_eq!(record1.len() + record2.len(), 205);

    let mut segment = record1.clone();
    segment.extend_from_slice(&record2);

    let frame = build_tcp_packet(src, dst, 51000, 443, 5000, None, &segment);
    write_pcap(&input, &[frame]);

    let mut executor = PipelineExecutor::new(PipelineConfig::default());
    let io = IoPolicy::new(dir.join("scratch"), "scenario2".to_string());
    executor.run(&[FileJob::new(&input, &output)], &io, NullSink).unwrap();

    let out_packets = read_all(&output);
    assert_eq!(out_packets.len(), 1);

    let off = payload_offset(None);
    let payload = &out_packets[0].data[off..];
    assert_eq!(&payload[0..5], &record1[0..5]);
    assert!(payload[5..174].iter().all(|&b| b == 0));
    assert_eq!(&payload[174..179], &record2[0..5]);
    assert!(payload[179..205].iter().all(|&b| b == 0));

    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 3: the same mixed handshake/application_data session, wrapped
/// in a single 802.1Q VLAN tag.
#[test]
fn vlan_tagged_session_is_masked_the_same_as_untagged() {
    let dir = test_dir();
    let input = dir.join("capture.pcap");
    let output = dir.join("out.pcap");

    let src = Ipv4Addr::new(10, 3, 0, 1);
    let dst = Ipv4Addr::new(10, 3, 0, 2);
    let vlan = Some(100u16);

    let records = vec![
        tls_record(22, &vec![0xAA; 80]),
        tls_record(22, &vec![0xBB; 60]),
        tls_record(23, &vec![0x01; 40]),
        tls_record(23, &vec![0x02; 40]),
    ];

    let mut seq = 2000u32;
    let mut frames = Vec::new();
    for record in &records {
        frames.push(build_tcp_packet(src, dst, 51000, 443, seq, vlan, record));
        seq = seq.wrapping_add(record.len() as u32);
    }
    write_pcap(&input, &frames);

    let mut executor = PipelineExecutor::new(PipelineConfig::default());
    let io = IoPolicy::new(dir.join("scratch"), "scenario3".to_string());
    executor.run(&[FileJob::new(&input, &output)], &io, NullSink).unwrap();

    let out_packets = read_all(&output);
    assert_eq!(out_packets.len(), 4);

    let off = payload_offset(vlan);
    // Handshake records (indices 0, 1) are fully preserved.
    assert_eq!(&out_packets[0].data[off..], records[0].as_slice());
    assert_eq!(&out_packets[1].data[off..], records[1].as_slice());
    // Application_data records (indices 2, 3) keep only their 5-byte header.
    for idx in [2usize, 3] {
        let payload = &out_packets[idx].data[off..];
        assert_eq!(&payload[0..5], &records[idx][0..5]);
        assert!(payload[5..].iter().all(|&b| b == 0));
    }

    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 4: three byte-identical packets at positions 4, 17, and 42 of a
/// 43-packet file - Deduplication keeps only the first, order preserved.
#[test]
fn deduplication_drops_later_copies_and_preserves_order() {
    let dir = test_dir();
    let input = dir.join("capture.pcap");
    let output = dir.join("out.pcap");

    let src = Ipv4Addr::new(10, 4, 0, 1);
    let dst = Ipv4Addr::new(10, 4, 0, 2);

    let mut frames: Vec<Vec<u8>> = (0..43u32)
        .map(|i| build_tcp_packet(src, dst, 51000, 443, 10_000 + i, None, format!("payload-{i}").as_bytes()))
        .collect();
    let duplicate = frames[4].clone();
    frames[17] = duplicate.clone();
    frames[42] = duplicate.clone();
    write_pcap(&input, &frames);

    let mut config = PipelineConfig::default();
    config.anon.enabled = false;
    config.mask.enabled = false;

    let mut executor = PipelineExecutor::new(config);
    let io = IoPolicy::new(dir.join("scratch"), "scenario4".to_string());
    executor.run(&[FileJob::new(&input, &output)], &io, NullSink).unwrap();

    let out_packets = read_all(&output);
    assert_eq!(out_packets.len(), 41, "two of the three identical packets are dropped");

    let out_bytes: Vec<&[u8]> = out_packets.iter().map(|p| p.data.as_slice()).collect();
    let expected: Vec<&[u8]> = frames
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != 17 && i != 42)
        .map(|(_, f)| f.as_slice())
        .collect();
    assert_eq!(out_bytes, expected, "surviving packets keep their original relative order");

    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 5: IPv4 prefix preservation - `10.1.5.197`, `10.1.5.198`, and
/// `10.1.5.43` share more prefix bits with each other than with
/// `10.171.240.102`, and the pseudonyms must reflect that grouping.
#[test]
fn anonymization_preserves_ipv4_prefix_structure() {
    let dir = test_dir();
    let input = dir.join("capture.pcap");
    let output = dir.join("out.pcap");

    let addrs = [
        Ipv4Addr::new(10, 1, 5, 197),
        Ipv4Addr::new(10, 1, 5, 198),
        Ipv4Addr::new(10, 1, 5, 43),
        Ipv4Addr::new(10, 171, 240, 102),
    ];
    let dst = Ipv4Addr::new(203, 0, 113, 1);

    let frames: Vec<Vec<u8>> = addrs
        .iter()
        .map(|&src| build_tcp_packet(src, dst, 51000, 443, 1, None, b"x"))
        .collect();
    write_pcap(&input, &frames);

    let mut config = PipelineConfig::default();
    config.dedup.enabled = false;
    config.mask.enabled = false;

    let mut executor = PipelineExecutor::new(config);
    let io = IoPolicy::new(dir.join("scratch"), "scenario5".to_string());
    executor.run(&[FileJob::new(&input, &output)], &io, NullSink).unwrap();

    let out_packets = read_all(&output);
    assert_eq!(out_packets.len(), 4);

    let off = payload_offset(None);
    let ip_off = off - TCP_HDR_LEN - IPV4_HDR_LEN + 12; // start of IPv4 src field
    let pseudonyms: Vec<Ipv4Addr> = out_packets
        .iter()
        .map(|p| {
            let b = &p.data[ip_off..ip_off + 4];
            Ipv4Addr::new(b[0], b[1], b[2], b[3])
        })
        .collect();

    // Real addresses are never echoed back unchanged.
    for (orig, pseudo) in addrs.iter().zip(pseudonyms.iter()) {
        assert_ne!(orig, pseudo);
    }

    let close_pair = common_prefix_len(pseudonyms[0], pseudonyms[1]);
    let far_pair = common_prefix_len(pseudonyms[0], pseudonyms[3]);
    assert!(
        close_pair > far_pair,
        "10.1.5.197 and 10.1.5.198 must pseudonymize to addresses sharing more prefix \
         bits with each other ({close_pair}) than with 10.171.240.102 ({far_pair})"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 6: TCP sequence wraparound - a stream's raw sequence goes from
/// `0xFFFFFE00` past `0` to `0x00001000`, with one TLS record entirely
/// inside the pre-wrap packet and a second starting exactly at the wrap
/// boundary, in the following packet.
#[test]
fn masking_survives_sequence_number_wraparound() {
    let dir = test_dir();
    let input = dir.join("capture.pcap");
    let output = dir.join("out.pcap");

    let src = Ipv4Addr::new(10, 6, 0, 1);
    let dst = Ipv4Addr::new(10, 6, 0, 2);

    let pre_wrap_seq: u32 = 0xFFFFFE00;
    let record1 = tls_record(23, &vec![0x55; 4603]); // 4608 bytes total
    assert_eq!(record1.len(), 4608);
    let post_wrap_seq = pre_wrap_seq.wrapping_add(record1.len() as u32);
    assert_eq!(post_wrap_seq, 0x1000);

    let record2 = tls_record(23, &vec![0x66; 10]); // 15 bytes total

    let frame1 = build_tcp_packet(src, dst, 51000, 443, pre_wrap_seq, None, &record1);
    let frame2 = build_tcp_packet(src, dst, 51000, 443, post_wrap_seq, None, &record2);
    write_pcap(&input, &[frame1, frame2]);

    let mut executor = PipelineExecutor::new(PipelineConfig::default());
    let io = IoPolicy::new(dir.join("scratch"), "scenario6".to_string());
    executor.run(&[FileJob::new(&input, &output)], &io, NullSink).unwrap();

    let out_packets = read_all(&output);
    assert_eq!(out_packets.len(), 2);

    let off = payload_offset(None);
    let payload1 = &out_packets[0].data[off..];
    assert_eq!(&payload1[0..5], &record1[0..5]);
    assert!(payload1[5..].iter().all(|&b| b == 0), "body of the pre-wrap record is masked");

    let payload2 = &out_packets[1].data[off..];
    assert_eq!(&payload2[0..5], &record2[0..5]);
    assert!(payload2[5..].iter().all(|&b| b == 0), "body of the post-wrap record is masked");

    let _ = std::fs::remove_dir_all(&dir);
}
