//! Configuration validation

use super::{Config, DEFAULT_MAX_PACKETS};
use crate::capture::{Backend, DEFAULT_BUFFER_SIZE, IFNAMSIZ};
use crate::demux::HeaderLayout;
use crate::telemetry::{is_known_format, is_known_level};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_interface(config, &mut result);
    validate_backend(config, &mut result);
    validate_buffer(config, &mut result);
    validate_log(config, &mut result);

    result
}

fn validate_interface(config: &Config, result: &mut ValidationResult) {
    let name = &config.capture.interface;

    if name.is_empty() {
        result.error("capture.interface: must not be empty");
    } else if name.len() >= IFNAMSIZ {
        result.error(format!(
            "capture.interface: '{}' exceeds {} bytes",
            name,
            IFNAMSIZ - 1
        ));
    } else if name.contains('\0') {
        result.error("capture.interface: contains a NUL byte");
    }
}

fn validate_backend(config: &Config, result: &mut ValidationResult) {
    let capture = &config.capture;
    let backend = capture.backend();

    if capture.backend.is_none() {
        result.warn(format!(
            "capture.backend: not specified, using native backend '{}'",
            backend
        ));
    }
    if !backend.is_available() {
        result.warn(format!(
            "capture.backend: '{}' is not available on this host",
            backend
        ));
    }

    match backend {
        Backend::Bpf => {
            if let Some(paths) = &capture.device_paths {
                if paths.is_empty() {
                    result.error("capture.device_paths: bpf needs at least one device path");
                }
            }
            if let Some(name) = &capture.header_layout {
                if HeaderLayout::by_name(name).is_none() {
                    result.error(format!(
                        "capture.header_layout: unknown layout '{}' (expected timeval32, timeval64 or native)",
                        name
                    ));
                }
            }
        }
        Backend::PacketSocket => {
            if capture.device_paths.is_some() {
                result.error("capture.device_paths: packet-socket is not opened by path");
            }
            if capture.link_type.is_some_and(|dlt| dlt != 0) {
                result.error("capture.link_type: packet-socket cannot select a link type");
            }
            if capture.header_accounting {
                result.warn("capture.header_accounting: ignored by single-frame packet-socket");
            }
            if capture.header_layout.is_some() {
                result.warn("capture.header_layout: ignored by single-frame packet-socket");
            }
        }
    }
}

fn validate_buffer(config: &Config, result: &mut ValidationResult) {
    let capture = &config.capture;

    match capture.buffer_size {
        None => result.warn(format!(
            "capture.buffer_size: not specified, using default {}",
            DEFAULT_BUFFER_SIZE
        )),
        Some(0) => result.error("capture.buffer_size: must be greater than 0"),
        Some(size) if capture.backend() == Backend::Bpf => {
            let layout = capture
                .header_layout
                .as_deref()
                .and_then(HeaderLayout::by_name)
                .unwrap_or_else(HeaderLayout::native);
            if (size as usize) < layout.min_len {
                result.error(format!(
                    "capture.buffer_size: {} cannot hold one {}-byte capture header",
                    size, layout.min_len
                ));
            }
        }
        Some(_) => {}
    }

    match capture.max_packets {
        None => result.warn(format!(
            "capture.max_packets: not specified, using default {}",
            DEFAULT_MAX_PACKETS
        )),
        Some(0) => result.error("capture.max_packets: must be greater than 0"),
        Some(_) => {}
    }
}

fn validate_log(config: &Config, result: &mut ValidationResult) {
    if !is_known_level(&config.log.level) {
        result.warn(format!(
            "log.level: unknown level '{}', falling back to info",
            config.log.level
        ));
    }
    if !is_known_format(&config.log.format) {
        result.warn(format!(
            "log.format: unknown format '{}', falling back to pretty",
            config.log.format
        ));
    }
}
