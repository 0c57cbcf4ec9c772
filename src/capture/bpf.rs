//! BPF device implementation (macOS, iOS, FreeBSD)

use super::sys::OwnedDevice;
use super::{Facility, Resource, Setting, BPF_DEVICE_PATHS};
use crate::demux::{FrameMode, HeaderLayout};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use libc::{c_uint, c_ulong};

const IFNAMSIZ: usize = 16;

// <sys/ioccom.h>
const IOC_OUT: c_ulong = 0x4000_0000;
const IOC_IN: c_ulong = 0x8000_0000;
const IOC_INOUT: c_ulong = IOC_IN | IOC_OUT;
const IOCPARM_MASK: c_ulong = 0x1fff;

const fn ioc(dir: c_ulong, group: u8, num: u8, len: usize) -> c_ulong {
    dir | (((len as c_ulong) & IOCPARM_MASK) << 16) | ((group as c_ulong) << 8) | num as c_ulong
}

const UINT: usize = std::mem::size_of::<c_uint>();

// <net/bpf.h>
const BIOCSBLEN: c_ulong = ioc(IOC_INOUT, b'B', 102, UINT);
const BIOCSETIF: c_ulong = ioc(IOC_IN, b'B', 108, std::mem::size_of::<IfReq>());
const BIOCIMMEDIATE: c_ulong = ioc(IOC_IN, b'B', 112, UINT);
const BIOCSHDRCMPLT: c_ulong = ioc(IOC_IN, b'B', 117, UINT);
const BIOCSDLT: c_ulong = ioc(IOC_IN, b'B', 120, UINT);

/// `struct ifreq`: name followed by a 16-byte union.
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_ifru: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<IfReq>() == 32);

/// Opens `/dev/bpf*` devices. Reads return several framed packets.
#[derive(Debug, Clone, Copy)]
pub struct BpfFacility {
    layout: HeaderLayout,
}

impl BpfFacility {
    pub fn new() -> Self {
        Self {
            layout: HeaderLayout::native(),
        }
    }

    /// Facility whose reads are framed with `layout` instead of the host
    /// default.
    pub fn with_layout(layout: HeaderLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }
}

impl Default for BpfFacility {
    fn default() -> Self {
        Self::new()
    }
}

impl Facility for BpfFacility {
    type Resource = BpfDevice;

    fn name(&self) -> &'static str {
        "bpf"
    }

    fn frame_mode(&self) -> FrameMode {
        FrameMode::Multi(self.layout)
    }

    fn default_device_paths(&self) -> Vec<PathBuf> {
        BPF_DEVICE_PATHS.iter().map(PathBuf::from).collect()
    }

    fn open(&self, path: Option<&Path>) -> io::Result<BpfDevice> {
        let path = path.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "BPF devices are opened by path")
        })?;
        let path_c = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let fd = unsafe { libc::open(path_c.as_ptr(), libc::O_RDWR) };
        let dev = OwnedDevice::from_raw(fd)?;

        Ok(BpfDevice { dev, blen: None })
    }
}

/// An open BPF device
#[derive(Debug)]
pub struct BpfDevice {
    dev: OwnedDevice,
    /// Buffer length the kernel settled on.
    blen: Option<u32>,
}

impl BpfDevice {
    /// Issues `request` with `value` and returns the argument as the kernel
    /// left it (in/out requests write back).
    fn ioctl_uint(&self, request: c_ulong, value: c_uint) -> io::Result<c_uint> {
        let mut value = value;
        let ret = unsafe { libc::ioctl(self.dev.as_raw_fd(), request, &mut value) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(value)
    }

    /// `BIOCSBLEN` clamps out-of-range lengths and reports the result.
    fn set_buffer_length(&mut self, len: u32) -> io::Result<()> {
        let effective = self.ioctl_uint(BIOCSBLEN, len)?;
        self.blen = Some(effective);
        Ok(())
    }

    fn set_interface(&self, ifname: &str) -> io::Result<()> {
        let mut ifr = IfReq {
            ifr_name: [0; IFNAMSIZ],
            ifr_ifru: [0; 16],
        };
        let name = ifname.as_bytes();
        if name.len() >= IFNAMSIZ || name.contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid interface name",
            ));
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name) {
            *dst = *src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(self.dev.as_raw_fd(), BIOCSETIF, &mut ifr) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Resource for BpfDevice {
    fn apply(&mut self, setting: &Setting<'_>) -> io::Result<()> {
        match *setting {
            Setting::BufferLength(len) => self.set_buffer_length(len),
            Setting::Interface(name) => self.set_interface(name),
            Setting::LinkType(dlt) => self.ioctl_uint(BIOCSDLT, dlt).map(|_| ()),
            Setting::HeaderComplete(on) => {
                self.ioctl_uint(BIOCSHDRCMPLT, on as c_uint).map(|_| ())
            }
            Setting::Immediate(on) => self.ioctl_uint(BIOCIMMEDIATE, on as c_uint).map(|_| ()),
        }
    }

    fn buffer_length(&self) -> Option<u32> {
        self.blen
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.dev.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.dev.write(buf)
    }

    fn close(self) -> io::Result<()> {
        self.dev.close()
    }
}

impl AsRawFd for BpfDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.dev.as_raw_fd()
    }
}
