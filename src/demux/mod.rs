//! Frame demultiplexing
//!
//! Turns one raw read from a capture handle into the packets it contains.
//! Two framings exist:
//! - Single-frame: the read is exactly one packet (packet sockets)
//! - Multi-frame: the read holds several header-prefixed, word-aligned
//!   packets (BPF devices)
//!
//! Nothing is copied: every record is an offset/length pair into the buffer,
//! and [`Batch`] borrows that buffer so the records cannot outlive it.

mod layout;

pub use layout::{round_up_to_alignment, Field, FieldKind, HeaderLayout};

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Capture timestamp with microsecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub micros: i64,
}

impl Timestamp {
    pub const fn new(secs: i64, micros: i64) -> Self {
        Self { secs, micros }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Carries whole seconds out of `micros` so that `0 <= micros < 1_000_000`.
    ///
    /// Capture headers are not validated, so `tv_usec` may be negative or
    /// larger than a second.
    pub fn normalized(&self) -> Option<Self> {
        let secs = self.secs.checked_add(self.micros.div_euclid(1_000_000))?;
        Some(Self::new(secs, self.micros.rem_euclid(1_000_000)))
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let t = self.normalized()?;
        let nanos = u32::try_from(t.micros * 1_000).ok()?;
        DateTime::from_timestamp(t.secs, nanos)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_micros() as i64),
            Err(e) => {
                // Before the epoch: borrow a second so micros stays positive
                let d = e.duration();
                let mut secs = -(d.as_secs() as i64);
                let mut micros = -(d.subsec_micros() as i64);
                if micros < 0 {
                    secs -= 1;
                    micros += 1_000_000;
                }
                Self::new(secs, micros)
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.6fZ")),
            None => match self.normalized() {
                Some(t) => write!(f, "{}.{:06}", t.secs, t.micros),
                None => write!(f, "{}s{:+}us", self.secs, self.micros),
            },
        }
    }
}

/// One packet located inside a raw read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedPacket {
    pub timestamp: Timestamp,
    /// Offset of the first payload byte in the raw buffer.
    pub offset: usize,
    /// Number of captured payload bytes.
    pub len: usize,
    /// Length of the packet on the wire (may exceed `len` when truncated by
    /// the capture facility).
    pub wire_len: usize,
}

impl CapturedPacket {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Payload bytes of this packet within `buf`.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.end()]
    }
}

/// Location of one capture header inside a raw read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSpan {
    pub offset: usize,
    pub len: usize,
}

/// How a raw read is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    Single,
    Multi(HeaderLayout),
}

impl FrameMode {
    pub fn is_multi(&self) -> bool {
        matches!(self, FrameMode::Multi(_))
    }
}

/// Packets demultiplexed from one raw read.
#[derive(Debug, Clone)]
pub struct Batch<'a> {
    data: &'a [u8],
    packets: Vec<CapturedPacket>,
    headers: Option<Vec<HeaderSpan>>,
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> &[CapturedPacket] {
        &self.packets
    }

    /// Header spans, present only when header accounting is enabled in
    /// multi-frame mode.
    pub fn headers(&self) -> Option<&[HeaderSpan]> {
        self.headers.as_deref()
    }

    pub fn npayloads(&self) -> usize {
        self.packets.len()
    }

    pub fn nheaders(&self) -> usize {
        self.headers.as_ref().map_or(0, Vec::len)
    }

    /// Number of valid bytes the batch was parsed from.
    pub fn bytes_read(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn payload(&self, packet: &CapturedPacket) -> &'a [u8] {
        packet.payload(self.data)
    }

    /// Iterates over packets together with their payload bytes.
    pub fn iter(&self) -> impl Iterator<Item = (&CapturedPacket, &'a [u8])> + '_ {
        let data = self.data;
        self.packets.iter().map(move |p| (p, p.payload(data)))
    }

    pub fn into_packets(self) -> Vec<CapturedPacket> {
        self.packets
    }
}

/// Splits raw reads into packets according to a [`FrameMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demultiplexer {
    mode: FrameMode,
    account_headers: bool,
}

impl Demultiplexer {
    /// Demultiplexer for facilities that deliver one packet per read.
    pub fn single() -> Self {
        Self {
            mode: FrameMode::Single,
            account_headers: false,
        }
    }

    /// Demultiplexer for buffered facilities using `layout`.
    pub fn multi(layout: HeaderLayout) -> Result<Self> {
        layout.validate()?;
        Ok(Self {
            mode: FrameMode::Multi(layout),
            account_headers: false,
        })
    }

    pub fn with_mode(mode: FrameMode) -> Result<Self> {
        match mode {
            FrameMode::Single => Ok(Self::single()),
            FrameMode::Multi(layout) => Self::multi(layout),
        }
    }

    /// Also report header offsets and sizes (multi-frame only).
    pub fn with_header_accounting(mut self, enable: bool) -> Self {
        self.account_headers = enable;
        self
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    pub fn header_accounting(&self) -> bool {
        self.account_headers
    }

    /// Parses `data` (exactly the bytes returned by one read), stamping a
    /// single-frame packet with the current time.
    pub fn parse<'a>(&self, data: &'a [u8], max_packets: usize) -> Result<Batch<'a>> {
        self.parse_at(data, max_packets, Timestamp::now())
    }

    /// Like [`parse`](Self::parse) with an explicit read time for single-frame
    /// mode. Multi-frame packets always carry their header timestamps.
    pub fn parse_at<'a>(
        &self,
        data: &'a [u8],
        max_packets: usize,
        read_at: Timestamp,
    ) -> Result<Batch<'a>> {
        match self.mode {
            FrameMode::Single => Ok(parse_single(data, max_packets, read_at)),
            FrameMode::Multi(layout) => {
                parse_multi(data, max_packets, &layout, self.account_headers)
            }
        }
    }
}

fn parse_single(data: &[u8], max_packets: usize, read_at: Timestamp) -> Batch<'_> {
    let mut packets = Vec::with_capacity(1);
    if max_packets > 0 && !data.is_empty() {
        packets.push(CapturedPacket {
            timestamp: read_at,
            offset: 0,
            len: data.len(),
            wire_len: data.len(),
        });
    }
    Batch {
        data,
        packets,
        headers: None,
    }
}

fn parse_multi<'a>(
    data: &'a [u8],
    max_packets: usize,
    layout: &HeaderLayout,
    account_headers: bool,
) -> Result<Batch<'a>> {
    let mut packets = Vec::new();
    let mut headers = account_headers.then(Vec::new);
    let mut offset = 0;

    // The bound is checked before the remainder so that a full batch never
    // inspects bytes it will not report.
    while offset < data.len() && packets.len() < max_packets {
        let remaining = data.len() - offset;
        if remaining < layout.min_len {
            return Err(Error::TruncatedHeader {
                offset,
                remaining,
                needed: layout.min_len,
            });
        }

        let header = &data[offset..offset + layout.min_len];
        let hdrlen = layout.hdrlen.read_len(header);
        let caplen = layout.caplen.read_len(header);

        if hdrlen < layout.min_len {
            return Err(Error::MalformedHeader { offset, hdrlen });
        }

        let payload_offset = offset + hdrlen;
        let end = payload_offset
            .checked_add(caplen)
            .filter(|end| *end <= data.len())
            .ok_or(Error::TruncatedPayload {
                offset,
                end: payload_offset.saturating_add(caplen),
                available: data.len(),
            })?;

        packets.push(CapturedPacket {
            timestamp: Timestamp::new(
                layout.tstamp_sec.read(header),
                layout.tstamp_usec.read(header),
            ),
            offset: payload_offset,
            len: caplen,
            wire_len: layout.datalen.read_len(header),
        });
        if let Some(headers) = headers.as_mut() {
            headers.push(HeaderSpan {
                offset,
                len: hdrlen,
            });
        }

        offset += layout.align(end - offset);
    }

    Ok(Batch {
        data,
        packets,
        headers,
    })
}
