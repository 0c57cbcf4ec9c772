//! Live capture on the loopback interface
//!
//! Run with: sudo -E cargo test --test live -- --ignored

#![cfg(target_os = "linux")]

use pfcap::capture::PacketSocketFacility;
use pfcap::{FrameMode, OpenOptions};

/// IEEE 802 local experimental EtherType
const ETHERTYPE_EXPERIMENTAL: u16 = 0x88b5;

fn marker_frame(marker: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0u8; 6]); // dst
    frame.extend_from_slice(&[0u8; 6]); // src
    frame.extend_from_slice(&ETHERTYPE_EXPERIMENTAL.to_be_bytes());
    frame.extend_from_slice(marker);
    frame.resize(60, 0);
    frame
}

#[test]
#[ignore] // Requires root (CAP_NET_RAW)
fn test_loopback_roundtrip() {
    let options = OpenOptions::new("lo").buffer_size(1 << 16);
    let mut rx = options.open(&PacketSocketFacility).expect("open receiver");
    let mut tx = options.open(&PacketSocketFacility).expect("open sender");
    assert_eq!(rx.frame_mode(), FrameMode::Single);

    let marker = b"pfcap-live-test";
    let frame = marker_frame(marker);
    assert_eq!(tx.write_raw(&frame).expect("send"), frame.len());

    let mut buf = vec![0u8; 2048];
    let mut found = false;
    for _ in 0..100 {
        let batch = rx.read_batch(&mut buf, 1).expect("read");
        let payload = batch.payload(&batch.packets()[0]);
        if payload.get(12..14) == Some(&ETHERTYPE_EXPERIMENTAL.to_be_bytes()[..])
            && payload[14..].starts_with(marker)
        {
            found = true;
            break;
        }
    }
    assert!(found, "marker frame not captured on lo");

    assert!(rx.stats().reads.get() >= 1);
    rx.close().expect("close receiver");
    tx.close().expect("close sender");
}
