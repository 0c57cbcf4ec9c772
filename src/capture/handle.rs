//! Capture handle: one open, configured capture resource.

use super::{BpfInsn, ConfigStep, Facility, Resource, Setting};
use crate::demux::{Batch, Demultiplexer, FrameMode, Timestamp};
use crate::telemetry::CaptureStats;
use crate::{Error, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Read buffer size used when none is requested.
pub const DEFAULT_BUFFER_SIZE: u32 = 4096;

/// Interface name capacity including the terminating NUL.
pub const IFNAMSIZ: usize = 16;

/// Parameters for [`CaptureHandle::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub interface: String,
    pub buffer_size: u32,
    /// Data link type; 0 keeps the facility default.
    pub link_type: u32,
    pub header_complete: bool,
    pub immediate: bool,
    /// Report header spans alongside payloads in multi-frame mode.
    pub header_accounting: bool,
    /// Overrides the facility's device path list.
    pub device_paths: Option<Vec<PathBuf>>,
}

impl OpenOptions {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            link_type: 0,
            header_complete: false,
            immediate: true,
            header_accounting: false,
            device_paths: None,
        }
    }

    pub fn buffer_size(mut self, len: u32) -> Self {
        self.buffer_size = len;
        self
    }

    pub fn link_type(mut self, dlt: u32) -> Self {
        self.link_type = dlt;
        self
    }

    pub fn header_complete(mut self, enable: bool) -> Self {
        self.header_complete = enable;
        self
    }

    pub fn immediate(mut self, enable: bool) -> Self {
        self.immediate = enable;
        self
    }

    pub fn header_accounting(mut self, enable: bool) -> Self {
        self.header_accounting = enable;
        self
    }

    pub fn device_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.device_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn open<F: Facility>(&self, facility: &F) -> Result<CaptureHandle<F::Resource>> {
        CaptureHandle::open(facility, self)
    }
}

/// An open capture resource bound to one interface.
///
/// Not meant for concurrent use: reads, writes and configuration calls must
/// be serialized by the owner.
pub struct CaptureHandle<R: Resource> {
    resource: R,
    interface: String,
    link_type: u32,
    buffer_size: u32,
    header_complete: bool,
    immediate: bool,
    demux: Demultiplexer,
    started: bool,
    stats: Arc<CaptureStats>,
}

impl<R: Resource> CaptureHandle<R> {
    /// Open a resource from `facility` and configure it.
    ///
    /// Settings are applied in a fixed order: buffer length, interface, link
    /// type (skipped when 0), header complete, immediate. If any of them is
    /// rejected the resource is closed before the error is returned.
    pub fn open<F>(facility: &F, options: &OpenOptions) -> Result<Self>
    where
        F: Facility<Resource = R>,
    {
        validate_interface(&options.interface)?;

        let demux = Demultiplexer::with_mode(facility.frame_mode())?
            .with_header_accounting(options.header_accounting);

        let paths = options
            .device_paths
            .clone()
            .unwrap_or_else(|| facility.default_device_paths());
        let mut resource = open_first(facility, &paths)?;

        let mut settings = vec![
            Setting::BufferLength(options.buffer_size),
            Setting::Interface(&options.interface),
        ];
        if options.link_type != 0 {
            settings.push(Setting::LinkType(options.link_type));
        }
        settings.push(Setting::HeaderComplete(options.header_complete));
        settings.push(Setting::Immediate(options.immediate));

        for setting in &settings {
            if let Err(source) = resource.apply(setting) {
                let step = setting.step();
                debug!(facility = facility.name(), %step, "configuration rejected: {}", source);
                if let Err(e) = resource.close() {
                    debug!("close after failed configuration: {}", e);
                }
                return Err(Error::Configure { step, source });
            }
        }

        let buffer_size = effective_length(&resource, options.buffer_size);

        debug!(
            facility = facility.name(),
            interface = %options.interface,
            buffer_size,
            link_type = options.link_type,
            "capture handle ready"
        );

        Ok(Self {
            resource,
            interface: options.interface.clone(),
            link_type: options.link_type,
            buffer_size,
            header_complete: options.header_complete,
            immediate: options.immediate,
            demux,
            started: false,
            stats: Arc::new(CaptureStats::new()),
        })
    }

    /// Change the read buffer length. The facility may adjust the value;
    /// [`buffer_size`](Self::buffer_size) reports the length in effect.
    ///
    /// In multi-frame mode the length is fixed once the first read has been
    /// issued.
    pub fn set_read_buffer_size(&mut self, len: u32) -> Result<()> {
        let step = ConfigStep::BufferLength;
        if self.started && self.demux.mode().is_multi() {
            return Err(Error::Configure {
                step,
                source: io::Error::other("buffer length is fixed once reading has started"),
            });
        }
        self.resource
            .apply(&Setting::BufferLength(len))
            .map_err(|source| Error::Configure { step, source })?;
        self.buffer_size = effective_length(&self.resource, len);
        Ok(())
    }

    /// Install a filter program. Kernel-side filtering is not supported.
    pub fn set_filter(&mut self, program: &[BpfInsn]) -> Result<()> {
        warn!(
            interface = %self.interface,
            instructions = program.len(),
            "filter program installation is not supported"
        );
        Err(Error::Unsupported("filter program installation"))
    }

    /// Blocking read of at most `buf.len()` bytes.
    ///
    /// Interruptions and empty reads are retried, so a successful result is
    /// never zero. BPF devices expect `buf.len()` to equal the buffer size.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            self.stats.rx_errors.inc();
            return Err(Error::Read(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read buffer is empty",
            )));
        }

        self.started = true;
        loop {
            match self.resource.read(buf) {
                Ok(0) => {
                    self.stats.rx_empty.inc();
                    trace!(interface = %self.interface, "empty read, retrying");
                }
                Ok(n) => {
                    self.stats.record_read(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.stats.rx_interrupted.inc();
                    trace!(interface = %self.interface, "read interrupted, retrying");
                }
                Err(e) => {
                    self.stats.rx_errors.inc();
                    return Err(Error::Read(e));
                }
            }
        }
    }

    /// Blocking write of `buf`, retried on interruption.
    pub fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.resource.write(buf) {
                Ok(n) => {
                    self.stats.record_write(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.stats.tx_interrupted.inc();
                    trace!(interface = %self.interface, "write interrupted, retrying");
                }
                Err(e) => {
                    self.stats.tx_errors.inc();
                    return Err(Error::Write(e));
                }
            }
        }
    }

    /// Read once into `buf` and split the result into at most `max_packets`
    /// packets. The batch borrows `buf`, so it must be consumed before the
    /// buffer is reused.
    pub fn read_batch<'b>(&mut self, buf: &'b mut [u8], max_packets: usize) -> Result<Batch<'b>> {
        let n = self.read_raw(buf)?;
        let read_at = Timestamp::now();
        let buf: &'b [u8] = buf;

        match self.demux.parse_at(&buf[..n], max_packets, read_at) {
            Ok(batch) => {
                self.stats.rx_packets.add(batch.len() as u64);
                Ok(batch)
            }
            Err(e) => {
                self.stats.parse_errors.inc();
                warn!(interface = %self.interface, bytes = n, "discarding read: {}", e);
                Err(e)
            }
        }
    }

    /// Release the resource.
    pub fn close(self) -> Result<()> {
        debug!(interface = %self.interface, "closing capture handle");
        self.resource.close().map_err(Error::Io)
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    /// Buffer length in effect. BPF reads must use exactly this many bytes.
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn header_complete(&self) -> bool {
        self.header_complete
    }

    pub fn immediate(&self) -> bool {
        self.immediate
    }

    pub fn frame_mode(&self) -> FrameMode {
        self.demux.mode()
    }

    pub fn demultiplexer(&self) -> &Demultiplexer {
        &self.demux
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }
}

fn effective_length<R: Resource>(resource: &R, requested: u32) -> u32 {
    match resource.buffer_length() {
        Some(len) if len != requested => {
            debug!(requested, effective = len, "buffer length adjusted by facility");
            len
        }
        Some(len) => len,
        None => requested,
    }
}

fn validate_interface(name: &str) -> Result<()> {
    if name.is_empty() || name.len() >= IFNAMSIZ || name.contains('\0') {
        return Err(Error::InterfaceNotFound {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Open the first path that succeeds, or the facility socket when `paths`
/// is empty.
fn open_first<F: Facility>(facility: &F, paths: &[PathBuf]) -> Result<F::Resource> {
    if paths.is_empty() {
        return facility.open(None).map_err(|source| Error::Open {
            tried: Vec::new(),
            source,
        });
    }

    let mut last_err = None;
    for path in paths {
        match facility.open(Some(path)) {
            Ok(resource) => {
                debug!(facility = facility.name(), path = %path.display(), "opened capture device");
                return Ok(resource);
            }
            Err(e) => {
                trace!(path = %path.display(), "cannot open: {}", e);
                last_err = Some(e);
            }
        }
    }

    Err(Error::Open {
        tried: paths.to_vec(),
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no device paths")),
    })
}
