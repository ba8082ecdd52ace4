// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common error type and clock helpers shared by the pipeline stages.

use std::fmt;

/// Common error type for packet, metadata and pipeline operations.
///
/// Per-packet variants ([`Error::InvalidPacket`], [`Error::UnexpectedEnd`],
/// [`Error::UnknownPacketType`], [`Error::ColumnOutOfRange`]) are recoverable
/// and only cost the offending packet. Metadata and configuration variants
/// are fatal at startup.
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket, file operations)
    Io(std::io::Error),
    /// Invalid packet data
    InvalidPacket(String),
    /// Unexpected end of data at given byte position
    UnexpectedEnd(usize),
    /// Unknown packet type
    UnknownPacketType(u16),
    /// Column measurement index outside of the frame width
    ColumnOutOfRange(u16),
    /// Unsupported UDP profile
    UnsupportedProfile(String),
    /// Configuration or metadata error
    Config(String),
    /// Metadata JSON could not be parsed
    Json(serde_json::Error),
    /// Sensor HTTP API error
    Http(Box<ureq::Error>),
    /// System time error
    SystemTime(std::time::SystemTimeError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::InvalidPacket(msg) => write!(f, "invalid packet: {}", msg),
            Error::UnexpectedEnd(len) => write!(f, "unexpected end of data at {} bytes", len),
            Error::UnknownPacketType(typ) => write!(f, "unknown packet type: {}", typ),
            Error::ColumnOutOfRange(id) => write!(f, "column index out of range: {}", id),
            Error::UnsupportedProfile(profile) => write!(f, "unsupported udp profile: {}", profile),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Json(err) => write!(f, "metadata parse error: {}", err),
            Error::Http(err) => write!(f, "sensor http error: {}", err),
            Error::SystemTime(err) => write!(f, "system time error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Http(Box::new(err))
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(err: std::time::SystemTimeError) -> Self {
        Error::SystemTime(err)
    }
}

/// Host wall-clock time in nanoseconds since the UNIX epoch.
///
/// Sensor timestamps are compared against this clock to detect a lidar that
/// is not synchronized with the host. On Linux uses `CLOCK_REALTIME`
/// directly, elsewhere falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn wall_clock() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn wall_clock() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}
