//! AF_PACKET socket implementation

use super::sys::OwnedDevice;
use super::{Facility, Resource, Setting};
use crate::demux::FrameMode;
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

/// Opens blocking `AF_PACKET` raw sockets. Every read yields one packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketSocketFacility;

impl Facility for PacketSocketFacility {
    type Resource = PacketSocket;

    fn name(&self) -> &'static str {
        "packet-socket"
    }

    fn frame_mode(&self) -> FrameMode {
        FrameMode::Single
    }

    fn open(&self, path: Option<&Path>) -> io::Result<PacketSocket> {
        if let Some(path) = path {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet sockets are not opened by path ({})", path.display()),
            ));
        }

        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };
        let dev = OwnedDevice::from_raw(fd)?;

        Ok(PacketSocket { dev, ifindex: None })
    }
}

/// AF_PACKET socket wrapper
#[derive(Debug)]
pub struct PacketSocket {
    dev: OwnedDevice,
    ifindex: Option<i32>,
}

impl PacketSocket {
    /// Index of the bound interface, once bound.
    pub fn ifindex(&self) -> Option<i32> {
        self.ifindex
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> io::Result<i32> {
        let ifname_c = CString::new(ifname)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let name_bytes = ifname_c.as_bytes_with_nul();
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface name too long",
            ));
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = *src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn bind(&mut self, ifname: &str) -> io::Result<()> {
        let fd = self.dev.as_raw_fd();
        let ifindex = Self::get_ifindex(fd, ifname)?;

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };

        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        self.ifindex = Some(ifindex);
        Ok(())
    }

    fn set_rcvbuf(&mut self, len: u32) -> io::Result<()> {
        let len = libc::c_int::try_from(len)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let ret = unsafe {
            libc::setsockopt(
                self.dev.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &len as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as u32,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Resource for PacketSocket {
    fn apply(&mut self, setting: &Setting<'_>) -> io::Result<()> {
        match *setting {
            Setting::BufferLength(len) => self.set_rcvbuf(len),
            Setting::Interface(name) => self.bind(name),
            Setting::LinkType(0) => Ok(()),
            Setting::LinkType(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "packet sockets cannot select a link type",
            )),
            // Raw sockets always send complete frames and deliver each
            // datagram as soon as it arrives.
            Setting::HeaderComplete(_) | Setting::Immediate(_) => Ok(()),
        }
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

impl AsRawFd for PacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.dev.as_raw_fd()
    }
}
