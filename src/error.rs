use std::io;
use std::path::PathBuf;

use crate::capture::ConfigStep;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("no capture device could be opened (tried {tried:?}): {source}")]
    Open {
        tried: Vec<PathBuf>,
        #[source]
        source: io::Error,
    },

    #[error("failed to configure capture ({step}): {source}")]
    Configure {
        step: ConfigStep,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("write error: {0}")]
    Write(#[source] io::Error),

    #[error("truncated capture header at offset {offset}: {remaining} bytes left, {needed} needed")]
    TruncatedHeader {
        offset: usize,
        remaining: usize,
        needed: usize,
    },

    #[error("truncated capture payload at offset {offset}: ends at {end}, only {available} bytes read")]
    TruncatedPayload {
        offset: usize,
        end: usize,
        available: usize,
    },

    #[error("malformed capture header at offset {offset}: header length {hdrlen}")]
    MalformedHeader { offset: usize, hdrlen: usize },
}

impl Error {
    /// True for errors raised while splitting a read buffer into packets.
    /// The buffer is lost but the handle remains usable.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Error::TruncatedHeader { .. }
                | Error::TruncatedPayload { .. }
                | Error::MalformedHeader { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
