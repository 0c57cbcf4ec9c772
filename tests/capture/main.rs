//! Capture handle tests against a scripted facility
//!
//! Run with: cargo test --test capture


use fake::{push_timeval32, Event, FakeFacility};
use pfcap::capture::{BpfInsn, ConfigStep};
use pfcap::{Error, FrameMode, HeaderLayout, OpenOptions, Timestamp};
use std::io;
use std::path::PathBuf;

const DEVICES: [&str; 4] = ["/dev/bpf", "/dev/bpf0", "/dev/bpf1", "/dev/bpf2"];

fn multi() -> FrameMode {
    FrameMode::Multi(HeaderLayout::TIMEVAL32)
}

fn apply(desc: &str) -> Event {
    Event::Apply(desc.to_string())
}

#[test]
fn test_open_applies_settings_in_order() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let options = OpenOptions::new("en0")
        .buffer_size(8192)
        .link_type(1)
        .header_complete(true);

    let handle = options.open(&facility).unwrap();

    assert_eq!(
        facility.events(),
        vec![
            Event::Open(Some(PathBuf::from("/dev/bpf"))),
            apply("blen=8192"),
            apply("ifname=en0"),
            apply("dlt=1"),
            apply("hdrcmplt=true"),
            apply("immediate=true"),
        ]
    );
    assert_eq!(handle.interface(), "en0");
    assert_eq!(handle.buffer_size(), 8192);
    assert_eq!(handle.link_type(), 1);
    assert!(handle.header_complete());
    assert!(handle.immediate());
    assert_eq!(handle.frame_mode(), multi());
}

#[test]
fn test_open_skips_default_link_type() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let _handle = OpenOptions::new("en0").open(&facility).unwrap();

    let events = facility.events();
    assert!(!events.iter().any(|e| matches!(e, Event::Apply(d) if d.starts_with("dlt="))));
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Apply(_))).count(),
        4
    );
}

#[test]
fn test_open_tries_device_paths_in_order() {
    let facility = FakeFacility::devices(multi(), &DEVICES)
        .openable(&["/dev/bpf1"], io::ErrorKind::PermissionDenied);

    let _handle = OpenOptions::new("en0").open(&facility).unwrap();

    let opens: Vec<Event> = facility
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Open(_)))
        .collect();
    assert_eq!(
        opens,
        vec![
            Event::Open(Some(PathBuf::from("/dev/bpf"))),
            Event::Open(Some(PathBuf::from("/dev/bpf0"))),
            Event::Open(Some(PathBuf::from("/dev/bpf1"))),
        ]
    );
}

#[test]
fn test_open_reports_every_tried_path() {
    let facility =
        FakeFacility::devices(multi(), &DEVICES).openable(&[], io::ErrorKind::PermissionDenied);

    let err = OpenOptions::new("en0").open(&facility).err().unwrap();

    match err {
        Error::Open { tried, source } => {
            let expected: Vec<PathBuf> = DEVICES.iter().map(PathBuf::from).collect();
            assert_eq!(tried, expected);
            assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(facility.count(&Event::Close), 0);
}

#[test]
fn test_open_device_path_override() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let _handle = OpenOptions::new("en0")
        .device_paths(["/dev/bpf7"])
        .open(&facility)
        .unwrap();

    assert_eq!(
        facility.events()[0],
        Event::Open(Some(PathBuf::from("/dev/bpf7")))
    );
}

#[test]
fn test_open_socket_without_paths() {
    let facility = FakeFacility::socket(FrameMode::Single);
    let handle = OpenOptions::new("lo").open(&facility).unwrap();

    assert_eq!(facility.events()[0], Event::Open(None));
    assert_eq!(handle.frame_mode(), FrameMode::Single);
}

#[test]
fn test_open_rejects_bad_interface_before_opening() {
    let facility = FakeFacility::devices(multi(), &DEVICES);

    for name in ["", "an-interface-name-too-long", "e\0n"] {
        let err = OpenOptions::new(name).open(&facility).err().unwrap();
        assert!(matches!(err, Error::InterfaceNotFound { .. }));
    }
    assert!(facility.events().is_empty());
}

#[test]
fn test_configure_failure_closes_resource() {
    let facility = FakeFacility::devices(multi(), &DEVICES).reject("ifname=");

    let err = OpenOptions::new("en9").open(&facility).err().unwrap();

    match err {
        Error::Configure { step, source } => {
            assert_eq!(step, ConfigStep::Interface);
            assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(
        facility.events(),
        vec![
            Event::Open(Some(PathBuf::from("/dev/bpf"))),
            apply("blen=4096"),
            apply("ifname=en9"),
            Event::Close,
            Event::Drop,
        ]
    );
}

#[test]
fn test_configure_failure_names_link_type() {
    let facility = FakeFacility::socket(FrameMode::Single).reject("dlt=");

    let err = OpenOptions::new("eth0")
        .link_type(105)
        .open(&facility)
        .err()
        .unwrap();

    assert!(matches!(
        err,
        Error::Configure {
            step: ConfigStep::LinkType,
            ..
        }
    ));
    assert_eq!(facility.count(&Event::Close), 1);
}

#[test]
fn test_read_retries_interrupt_and_empty() {
    let facility = FakeFacility::socket(FrameMode::Single);
    facility.push_read(Err(io::Error::from(io::ErrorKind::Interrupted)));
    facility.push_read(Ok(Vec::new()));
    facility.push_read(Err(io::Error::from(io::ErrorKind::Interrupted)));
    facility.push_read(Ok(vec![0xaa; 60]));

    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();
    let mut buf = [0u8; 128];
    let n = handle.read_raw(&mut buf).unwrap();

    assert_eq!(n, 60);
    assert!(buf[..60].iter().all(|b| *b == 0xaa));
    assert_eq!(facility.count(&Event::Read(128)), 4);

    let stats = handle.stats();
    assert_eq!(stats.reads.get(), 1);
    assert_eq!(stats.rx_bytes.get(), 60);
    assert_eq!(stats.rx_interrupted.get(), 2);
    assert_eq!(stats.rx_empty.get(), 1);
}

#[test]
fn test_read_error_is_reported() {
    let facility = FakeFacility::socket(FrameMode::Single);
    facility.push_read(Err(io::Error::from(io::ErrorKind::ConnectionReset)));

    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();
    let mut buf = [0u8; 64];

    match handle.read_raw(&mut buf) {
        Err(Error::Read(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(handle.stats().rx_errors.get(), 1);
}

#[test]
fn test_read_into_empty_buffer() {
    let facility = FakeFacility::socket(FrameMode::Single);
    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();

    match handle.read_raw(&mut []) {
        Err(Error::Read(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!facility
        .events()
        .iter()
        .any(|e| matches!(e, Event::Read(_))));
}

#[test]
fn test_write_retries_interrupt() {
    let facility = FakeFacility::socket(FrameMode::Single);
    facility.push_write(Err(io::Error::from(io::ErrorKind::Interrupted)));
    facility.push_write(Ok(42));

    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();
    assert_eq!(handle.write_raw(&[0u8; 42]).unwrap(), 42);

    assert_eq!(facility.count(&Event::Write(42)), 2);
    assert_eq!(handle.stats().tx_interrupted.get(), 1);
    assert_eq!(handle.stats().tx_bytes.get(), 42);
}

#[test]
fn test_write_error_is_reported() {
    let facility = FakeFacility::socket(FrameMode::Single);
    facility.push_write(Err(io::Error::from(io::ErrorKind::BrokenPipe)));

    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();

    match handle.write_raw(&[1, 2, 3]) {
        Err(Error::Write(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(handle.stats().tx_errors.get(), 1);
}

#[test]
fn test_set_filter_is_unsupported() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let mut handle = OpenOptions::new("en0").open(&facility).unwrap();

    // ret #-1: accept everything
    let program = [BpfInsn::new(0x06, 0, 0, u32::MAX)];
    assert!(matches!(
        handle.set_filter(&program),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_buffer_size_fixed_after_first_read_in_multi_mode() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let mut record = Vec::new();
    push_timeval32(&mut record, 18, &[1, 2, 3, 4], 1, 0);
    facility.push_read(Ok(record));

    let mut handle = OpenOptions::new("en0").open(&facility).unwrap();
    handle.set_read_buffer_size(2048).unwrap();
    assert_eq!(handle.buffer_size(), 2048);
    assert_eq!(facility.count(&apply("blen=2048")), 1);

    let mut buf = vec![0u8; 2048];
    handle.read_batch(&mut buf, 8).unwrap();

    let err = handle.set_read_buffer_size(4096).err().unwrap();
    assert!(matches!(
        err,
        Error::Configure {
            step: ConfigStep::BufferLength,
            ..
        }
    ));
    assert_eq!(handle.buffer_size(), 2048);
    assert_eq!(facility.count(&apply("blen=4096")), 1);
}

#[test]
fn test_buffer_size_adjustable_in_single_mode() {
    let facility = FakeFacility::socket(FrameMode::Single);
    facility.push_read(Ok(vec![0; 20]));

    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();
    let mut buf = [0u8; 64];
    handle.read_raw(&mut buf).unwrap();

    handle.set_read_buffer_size(1 << 20).unwrap();
    assert_eq!(handle.buffer_size(), 1 << 20);
}

#[test]
fn test_buffer_size_rejected_by_facility() {
    let facility = FakeFacility::socket(FrameMode::Single).reject("blen=1");
    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();

    let err = handle.set_read_buffer_size(1).err().unwrap();
    assert!(matches!(
        err,
        Error::Configure {
            step: ConfigStep::BufferLength,
            ..
        }
    ));
    assert_eq!(handle.buffer_size(), 4096);
}

#[test]
fn test_buffer_size_reports_clamped_length() {
    let facility = FakeFacility::devices(multi(), &DEVICES).max_buffer(512 * 1024);
    let mut record = Vec::new();
    push_timeval32(&mut record, 18, b"clamped", 3, 0);
    facility.push_read(Ok(record));

    let mut handle = OpenOptions::new("en0")
        .buffer_size(1 << 20)
        .open(&facility)
        .unwrap();
    assert_eq!(handle.buffer_size(), 512 * 1024);

    handle.set_read_buffer_size(2 << 20).unwrap();
    assert_eq!(handle.buffer_size(), 512 * 1024);
    handle.set_read_buffer_size(8192).unwrap();
    assert_eq!(handle.buffer_size(), 8192);

    let mut buf = vec![0u8; handle.buffer_size() as usize];
    let batch = handle.read_batch(&mut buf, 4).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(facility.count(&Event::Read(8192)), 1);
}

#[test]
fn test_read_batch_multi_frame() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let mut raw = Vec::new();
    push_timeval32(&mut raw, 18, b"0123456789", 1_700_000_000, 250);
    push_timeval32(&mut raw, 18, b"abcdef", 1_700_000_001, 500);
    assert_eq!(raw.len(), 52);
    facility.push_read(Ok(raw));

    let mut handle = OpenOptions::new("en0")
        .header_accounting(true)
        .open(&facility)
        .unwrap();
    let mut buf = vec![0u8; 64];
    let batch = handle.read_batch(&mut buf, 16).unwrap();

    assert_eq!(batch.bytes_read(), 52);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.nheaders(), 2);

    let payloads: Vec<&[u8]> = batch.iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec![&b"0123456789"[..], &b"abcdef"[..]]);

    let packets = batch.packets();
    assert_eq!(packets[0].offset, 18);
    assert_eq!(packets[0].timestamp, Timestamp::new(1_700_000_000, 250));
    assert_eq!(packets[1].offset, 46);
    assert_eq!(packets[1].timestamp, Timestamp::new(1_700_000_001, 500));

    let headers = batch.headers().unwrap();
    assert_eq!(headers[1].offset, 28);
    assert_eq!(headers[1].len, 18);

    assert_eq!(handle.stats().rx_packets.get(), 2);
}

#[test]
fn test_read_batch_single_frame_stamped_at_read() {
    let facility = FakeFacility::socket(FrameMode::Single);
    facility.push_read(Ok(vec![7; 37]));

    let mut handle = OpenOptions::new("lo").open(&facility).unwrap();
    let mut buf = vec![0u8; 1500];

    let before = Timestamp::now();
    let batch = handle.read_batch(&mut buf, 4).unwrap();
    let after = Timestamp::now();

    assert_eq!(batch.len(), 1);
    let packet = batch.packets()[0];
    assert_eq!(packet.offset, 0);
    assert_eq!(packet.len, 37);
    assert!(before <= packet.timestamp && packet.timestamp <= after);
    assert!(batch.headers().is_none());
}

#[test]
fn test_read_batch_truncated_buffer_is_counted() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let mut raw = Vec::new();
    push_timeval32(&mut raw, 18, b"hello", 1, 0);
    raw.extend_from_slice(&[0u8; 10]);
    facility.push_read(Ok(raw));

    let mut good = Vec::new();
    push_timeval32(&mut good, 18, b"again", 2, 0);
    facility.push_read(Ok(good));

    let mut handle = OpenOptions::new("en0").open(&facility).unwrap();
    let mut buf = vec![0u8; 4096];

    let err = handle.read_batch(&mut buf, 8).err().unwrap();
    assert!(matches!(
        err,
        Error::TruncatedHeader {
            offset: 24,
            remaining: 10,
            needed: 18
        }
    ));
    assert_eq!(handle.stats().parse_errors.get(), 1);

    let batch = handle.read_batch(&mut buf, 8).unwrap();
    assert_eq!(batch.payload(&batch.packets()[0]), b"again");
}

#[test]
fn test_close_releases_once() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let handle = OpenOptions::new("en0").open(&facility).unwrap();

    handle.close().unwrap();

    assert_eq!(facility.count(&Event::Close), 1);
    assert_eq!(facility.events().last(), Some(&Event::Drop));
}

#[test]
fn test_drop_releases_without_close() {
    let facility = FakeFacility::devices(multi(), &DEVICES);
    let handle = OpenOptions::new("en0").open(&facility).unwrap();

    drop(handle);

    assert_eq!(facility.count(&Event::Close), 0);
    assert_eq!(facility.count(&Event::Drop), 1);
}
