//! Configuration types

use crate::capture::{Backend, OpenOptions, DEFAULT_BUFFER_SIZE};
use crate::demux::HeaderLayout;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Packets demultiplexed per read when not configured.
pub const DEFAULT_MAX_PACKETS: usize = 64;

/// User-defined configuration (capture.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub interface: String,
    pub backend: Option<Backend>,
    pub buffer_size: Option<u32>,
    pub link_type: Option<u32>,
    #[serde(default)]
    pub header_complete: bool,
    pub immediate: Option<bool>,
    pub max_packets: Option<usize>,
    #[serde(default)]
    pub header_accounting: bool,
    pub device_paths: Option<Vec<PathBuf>>,
    /// Header layout preset: timeval32, timeval64 or native.
    pub header_layout: Option<String>,
}

impl CaptureConfig {
    pub fn backend(&self) -> Backend {
        self.backend.unwrap_or_default()
    }
}

// ============================================================================
// Lock file types (generated, includes all defaults)
// ============================================================================

/// Generated lock file with all defaults filled in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLock {
    pub generated_at: String,
    pub capture: CaptureLock,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureLock {
    pub interface: String,
    pub backend: Backend,
    pub buffer_size: u32,
    pub link_type: u32,
    pub header_complete: bool,
    pub immediate: bool,
    pub max_packets: usize,
    pub header_accounting: bool,
    pub device_paths: Vec<PathBuf>,
    /// Resolved preset name; absent for single-frame backends.
    pub header_layout: Option<String>,
    pub header_len: Option<usize>,
    pub alignment: Option<usize>,
}

impl ConfigLock {
    pub fn from_config(config: &Config) -> Self {
        let capture = &config.capture;
        let backend = capture.backend();

        let layout = match backend {
            Backend::Bpf => Some(
                capture
                    .header_layout
                    .as_deref()
                    .and_then(HeaderLayout::by_name)
                    .unwrap_or_else(HeaderLayout::native),
            ),
            Backend::PacketSocket => None,
        };

        ConfigLock {
            generated_at: chrono::Utc::now().to_rfc3339(),
            capture: CaptureLock {
                interface: capture.interface.clone(),
                backend,
                buffer_size: capture.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
                link_type: capture.link_type.unwrap_or(0),
                header_complete: capture.header_complete,
                immediate: capture.immediate.unwrap_or(true),
                max_packets: capture.max_packets.unwrap_or(DEFAULT_MAX_PACKETS),
                header_accounting: capture.header_accounting,
                device_paths: capture
                    .device_paths
                    .clone()
                    .unwrap_or_else(|| backend.default_device_paths()),
                header_layout: layout
                    .and_then(|l| l.preset_name())
                    .map(str::to_string),
                header_len: layout.map(|l| l.min_len),
                alignment: layout.map(|l| l.alignment),
            },
            log: config.log.clone(),
        }
    }

    pub fn open_options(&self) -> OpenOptions {
        self.capture.open_options()
    }
}

impl CaptureLock {
    /// Options for [`CaptureHandle::open`](crate::capture::CaptureHandle::open).
    pub fn open_options(&self) -> OpenOptions {
        let options = OpenOptions::new(self.interface.clone())
            .buffer_size(self.buffer_size)
            .link_type(self.link_type)
            .header_complete(self.header_complete)
            .immediate(self.immediate)
            .header_accounting(self.header_accounting);

        if self.device_paths.is_empty() {
            options
        } else {
            options.device_paths(self.device_paths.iter().cloned())
        }
    }

    /// Header layout for multi-frame backends.
    pub fn layout(&self) -> Option<HeaderLayout> {
        self.header_layout.as_deref().and_then(HeaderLayout::by_name)
    }

    /// Checks that the recorded header geometry matches the named layout.
    pub fn check(&self) -> Result<()> {
        let layout = match (&self.header_layout, self.layout()) {
            (None, _) => None,
            (Some(_), Some(layout)) => Some(layout),
            (Some(name), None) => {
                return Err(Error::Config(format!(
                    "capture.header_layout: unknown layout '{}'",
                    name
                )))
            }
        };

        let expected = (
            layout.map(|l| l.min_len),
            layout.map(|l| l.alignment),
        );
        if (self.header_len, self.alignment) != expected {
            return Err(Error::Config(format!(
                "capture.header_len/alignment: {:?}/{:?} do not match layout {} ({:?}/{:?})",
                self.header_len,
                self.alignment,
                self.header_layout.as_deref().unwrap_or("none"),
                expected.0,
                expected.1
            )));
        }
        Ok(())
    }
}
