//! Packet capture backends
//!
//! A capture facility is the OS mechanism that hands raw link-layer frames
//! to user space:
//! - BPF devices (`/dev/bpf*`): buffered, several framed packets per read
//! - AF_PACKET sockets: one packet per read
//!
//! [`CaptureHandle`] drives either one through the [`Facility`] and
//! [`Resource`] traits, so tests can substitute a scripted fake.

mod handle;
#[cfg(unix)]
mod sys;

#[cfg(target_os = "linux")]
mod af_packet;
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
mod bpf;

pub use handle::{CaptureHandle, OpenOptions, DEFAULT_BUFFER_SIZE, IFNAMSIZ};

#[cfg(target_os = "linux")]
pub use af_packet::{PacketSocket, PacketSocketFacility};
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub use bpf::{BpfDevice, BpfFacility};

use crate::demux::FrameMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// BPF device nodes, tried in this order until one opens.
pub const BPF_DEVICE_PATHS: [&str; 11] = [
    "/dev/bpf",
    "/dev/bpf0",
    "/dev/bpf1",
    "/dev/bpf2",
    "/dev/bpf3",
    "/dev/bpf4",
    "/dev/bpf5",
    "/dev/bpf6",
    "/dev/bpf7",
    "/dev/bpf8",
    "/dev/bpf9",
];

/// One configuration operation applied to a freshly opened resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting<'a> {
    BufferLength(u32),
    Interface(&'a str),
    LinkType(u32),
    HeaderComplete(bool),
    Immediate(bool),
}

impl Setting<'_> {
    pub fn step(&self) -> ConfigStep {
        match self {
            Setting::BufferLength(_) => ConfigStep::BufferLength,
            Setting::Interface(_) => ConfigStep::Interface,
            Setting::LinkType(_) => ConfigStep::LinkType,
            Setting::HeaderComplete(_) => ConfigStep::HeaderComplete,
            Setting::Immediate(_) => ConfigStep::Immediate,
        }
    }
}

/// Names the configuration operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigStep {
    BufferLength,
    Interface,
    LinkType,
    HeaderComplete,
    Immediate,
}

impl fmt::Display for ConfigStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigStep::BufferLength => "buffer length",
            ConfigStep::Interface => "interface",
            ConfigStep::LinkType => "link type",
            ConfigStep::HeaderComplete => "header complete",
            ConfigStep::Immediate => "immediate mode",
        };
        f.write_str(name)
    }
}

/// An open OS capture resource.
pub trait Resource {
    /// Apply one configuration setting.
    fn apply(&mut self, setting: &Setting<'_>) -> io::Result<()>;

    /// Read buffer length in effect after the last `BufferLength` setting,
    /// when the facility may adjust the requested value. `None` means the
    /// requested length is used as is.
    fn buffer_length(&self) -> Option<u32> {
        None
    }

    /// One blocking read. `Ok(0)` and `Interrupted` are passed through
    /// unchanged; retrying is the handle's job.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// One blocking write.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Release the resource.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// A capture facility able to open [`Resource`]s.
pub trait Facility {
    type Resource: Resource;

    fn name(&self) -> &'static str;

    /// Framing of the bytes returned by reads.
    fn frame_mode(&self) -> FrameMode;

    /// Device paths tried when the caller supplies none. Empty means the
    /// facility is a protocol socket opened with `open(None)`.
    fn default_device_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn open(&self, path: Option<&Path>) -> io::Result<Self::Resource>;
}

/// Backend type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Bpf,
    PacketSocket,
}

impl Backend {
    /// Backend compiled for the host OS.
    pub const fn native() -> Backend {
        if cfg!(target_os = "linux") {
            Backend::PacketSocket
        } else {
            Backend::Bpf
        }
    }

    pub const fn is_available(self) -> bool {
        match self {
            Backend::Bpf => cfg!(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd"
            )),
            Backend::PacketSocket => cfg!(target_os = "linux"),
        }
    }

    pub fn default_device_paths(self) -> Vec<PathBuf> {
        match self {
            Backend::Bpf => BPF_DEVICE_PATHS.iter().map(PathBuf::from).collect(),
            Backend::PacketSocket => Vec::new(),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::Bpf => "bpf",
            Backend::PacketSocket => "packet-socket",
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::native()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bpf" => Ok(Backend::Bpf),
            "packet-socket" | "af_packet" | "af-packet" => Ok(Backend::PacketSocket),
            other => Err(format!("unknown capture backend '{}'", other)),
        }
    }
}

/// A classic BPF instruction (`struct bpf_insn`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfInsn {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

const _: () = assert!(std::mem::size_of::<BpfInsn>() == 8);

impl BpfInsn {
    pub const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        Self { code, jt, jf, k }
    }
}
