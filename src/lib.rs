//! pfcap - link-layer packet capture
//!
//! Opens a capture handle on a network interface (BPF device or AF_PACKET
//! socket) and splits raw reads into captured-packet records without
//! copying payload bytes.

pub mod capture;
pub mod config;
pub mod demux;
pub mod error;
pub mod telemetry;

pub use capture::{Backend, CaptureHandle, Facility, OpenOptions, Resource};
pub use demux::{Batch, CapturedPacket, Demultiplexer, FrameMode, HeaderLayout, Timestamp};
pub use error::{Error, Result};
