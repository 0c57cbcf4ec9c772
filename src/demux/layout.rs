//! Capture header layouts
//!
//! A buffered capture device prefixes every packet with a header whose exact
//! layout depends on the platform. The layout is data, not code, so that the
//! demultiplexer can walk buffers produced by any of them.

use crate::{Error, Result};

/// Width and signedness of one header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U16,
    U32,
    I32,
    I64,
}

impl FieldKind {
    pub const fn width(self) -> usize {
        match self {
            FieldKind::U16 => 2,
            FieldKind::U32 | FieldKind::I32 => 4,
            FieldKind::I64 => 8,
        }
    }
}

/// One fixed-position field inside a capture header (native byte order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(offset: usize, kind: FieldKind) -> Self {
        Self { offset, kind }
    }

    /// End offset of the field. Only meaningful for a validated layout.
    pub const fn end(&self) -> usize {
        self.offset + self.kind.width()
    }

    pub const fn checked_end(&self) -> Option<usize> {
        self.offset.checked_add(self.kind.width())
    }

    /// Reads the field from a header slice.
    ///
    /// The caller guarantees `header.len() >= self.end()`.
    pub(crate) fn read(&self, header: &[u8]) -> i64 {
        let b = &header[self.offset..self.end()];
        match self.kind {
            FieldKind::U16 => u16::from_ne_bytes([b[0], b[1]]) as i64,
            FieldKind::U32 => u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i64,
            FieldKind::I32 => i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as i64,
            FieldKind::I64 => {
                i64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        }
    }

    /// Reads the field as a length. Negative values clamp to zero.
    pub(crate) fn read_len(&self, header: &[u8]) -> usize {
        usize::try_from(self.read(header)).unwrap_or(0)
    }
}

/// Byte layout of a platform capture header plus the alignment unit the
/// producer uses between consecutive packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Bytes needed to decode every field of one header.
    pub min_len: usize,
    pub tstamp_sec: Field,
    pub tstamp_usec: Field,
    /// Captured (stored) payload length.
    pub caplen: Field,
    /// Original length of the packet on the wire.
    pub datalen: Field,
    /// Header length including any padding before the payload.
    pub hdrlen: Field,
    /// Word-alignment unit applied to `hdrlen + caplen`.
    pub alignment: usize,
}

impl HeaderLayout {
    /// `struct bpf_hdr` with a 32-bit `timeval` (macOS, iOS).
    pub const TIMEVAL32: HeaderLayout = HeaderLayout {
        min_len: 18,
        tstamp_sec: Field::new(0, FieldKind::I32),
        tstamp_usec: Field::new(4, FieldKind::I32),
        caplen: Field::new(8, FieldKind::U32),
        datalen: Field::new(12, FieldKind::U32),
        hdrlen: Field::new(16, FieldKind::U16),
        alignment: 4,
    };

    /// `struct bpf_hdr` with a native 64-bit `timeval` (64-bit FreeBSD).
    pub const TIMEVAL64: HeaderLayout = HeaderLayout {
        min_len: 26,
        tstamp_sec: Field::new(0, FieldKind::I64),
        tstamp_usec: Field::new(8, FieldKind::I64),
        caplen: Field::new(16, FieldKind::U32),
        datalen: Field::new(20, FieldKind::U32),
        hdrlen: Field::new(24, FieldKind::U16),
        alignment: 8,
    };

    /// Layout produced by the host's BPF implementation.
    pub const fn native() -> HeaderLayout {
        if cfg!(any(target_os = "macos", target_os = "ios"))
            || cfg!(target_pointer_width = "32")
        {
            Self::TIMEVAL32
        } else {
            Self::TIMEVAL64
        }
    }

    /// Looks up a preset by name (`timeval32`, `timeval64`, `native`).
    pub fn by_name(name: &str) -> Option<HeaderLayout> {
        match name.to_lowercase().as_str() {
            "timeval32" => Some(Self::TIMEVAL32),
            "timeval64" => Some(Self::TIMEVAL64),
            "native" => Some(Self::native()),
            _ => None,
        }
    }

    /// Name of the preset this layout equals, if any.
    pub fn preset_name(&self) -> Option<&'static str> {
        if *self == Self::TIMEVAL32 {
            Some("timeval32")
        } else if *self == Self::TIMEVAL64 {
            Some("timeval64")
        } else {
            None
        }
    }

    /// Checks that every field fits in `min_len` and the alignment is usable.
    pub fn validate(&self) -> Result<()> {
        if self.alignment == 0 {
            return Err(Error::Config("header alignment must be non-zero".into()));
        }
        if self.min_len == 0 {
            return Err(Error::Config("header length must be non-zero".into()));
        }
        let fields = [
            ("tstamp_sec", self.tstamp_sec),
            ("tstamp_usec", self.tstamp_usec),
            ("caplen", self.caplen),
            ("datalen", self.datalen),
            ("hdrlen", self.hdrlen),
        ];
        for (name, field) in fields {
            match field.checked_end() {
                Some(end) if end <= self.min_len => {}
                Some(end) => {
                    return Err(Error::Config(format!(
                        "header field {} ends at {} beyond header length {}",
                        name, end, self.min_len
                    )));
                }
                None => {
                    return Err(Error::Config(format!(
                        "header field {} offset {} overflows",
                        name, field.offset
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn align(&self, n: usize) -> usize {
        round_up_to_alignment(n, self.alignment)
    }
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self::native()
    }
}

/// Rounds `n` up to the next multiple of `unit` (`BPF_WORDALIGN`).
///
/// `unit` must be non-zero.
#[inline]
pub const fn round_up_to_alignment(n: usize, unit: usize) -> usize {
    n.div_ceil(unit) * unit
}
