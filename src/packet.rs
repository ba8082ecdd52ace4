// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ouster UDP packet layouts.
//!
//! Packets are decoded in place through borrowed slice views
//! ([`HeaderSlice`], [`ColumnSlice`], [`ImuSlice`]) so the hot path never
//! copies or allocates.
//!
//! # Lidar packet (`LEGACY`)
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ column 0                                     │
//! │  header 16B: ts:u64 mid:u16 fid:u16 enc:u32  │
//! │  pixels H × 12B: range:u32 rfl sig nir:u16   │
//! │  footer 4B: status:u32 (0xffffffff = valid)  │
//! ├──────────────────────────────────────────────┤
//! │ column 1 .. columns_per_packet-1             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Lidar packet (`RNG19_RFL8_SIG16_NIR16`, `RNG15_RFL8_NIR8`)
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ packet header 32B: type:u16 fid:u16 ...      │
//! ├──────────────────────────────────────────────┤
//! │ column header 12B: ts:u64 mid:u16 status:u16 │
//! │  pixels H × 12B or H × 4B                    │
//! ├──────────────────────────────────────────────┤
//! │ ... columns_per_packet columns               │
//! ├──────────────────────────────────────────────┤
//! │ packet footer 32B                            │
//! └──────────────────────────────────────────────┘
//! ```

use crate::lidar::Error;
use std::{fmt, str::FromStr};

/// Size of a `LEGACY` IMU packet.
pub const IMU_PACKET_SIZE: usize = 48;

/// Packet type carried by lidar packets in the non-legacy profiles.
const LIDAR_PACKET_TYPE: u16 = 1;

/// Lidar UDP profile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LidarProfile {
    /// Firmware 1.x compatible layout, 20-bit range.
    Legacy,
    /// `RNG19_RFL8_SIG16_NIR16`
    SingleReturn,
    /// `RNG15_RFL8_NIR8`, range in 8 mm units and no signal channel.
    LowDataRate,
}

impl FromStr for LidarProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEGACY" => Ok(LidarProfile::Legacy),
            "RNG19_RFL8_SIG16_NIR16" => Ok(LidarProfile::SingleReturn),
            "RNG15_RFL8_NIR8" => Ok(LidarProfile::LowDataRate),
            _ => Err(Error::UnsupportedProfile(s.to_string())),
        }
    }
}

impl fmt::Display for LidarProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LidarProfile::Legacy => write!(f, "LEGACY"),
            LidarProfile::SingleReturn => write!(f, "RNG19_RFL8_SIG16_NIR16"),
            LidarProfile::LowDataRate => write!(f, "RNG15_RFL8_NIR8"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Packet Type is 0x1 for Lidar packets.
    pub packet_type: u16,
    /// Index of the lidar scan, increments every time the sensor completes a
    /// rotation, crossing the zero azimuth angle.
    pub frame_id: u16,
    /// Initialization ID. Updates on every reinit and every reboot.
    pub init_id: u32,
    /// Serial number of the sensor.
    pub serial_number: u64,
}

impl Header {
    /// Length of the header in bytes/octets.
    pub const LEN: usize = 32;
}

/// Non-legacy packet header view.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeaderSlice<'a> {
    slice: &'a [u8],
}

impl<'a> HeaderSlice<'a> {
    pub fn from_slice(slice: &'a [u8]) -> Result<HeaderSlice<'a>, Error> {
        if slice.len() < Header::LEN {
            return Err(Error::UnexpectedEnd(slice.len()));
        }

        let packet_type = u16::from_le_bytes([slice[0], slice[1]]);
        if packet_type != LIDAR_PACKET_TYPE {
            return Err(Error::UnknownPacketType(packet_type));
        }

        Ok(HeaderSlice { slice })
    }

    pub fn to_header(&self) -> Header {
        Header {
            packet_type: self.packet_type(),
            frame_id: self.frame_id(),
            init_id: self.init_id(),
            serial_number: self.serial_number(),
        }
    }

    pub fn packet_type(&self) -> u16 {
        u16::from_le_bytes([self.slice[0], self.slice[1]])
    }

    pub fn frame_id(&self) -> u16 {
        u16::from_le_bytes([self.slice[2], self.slice[3]])
    }

    pub fn init_id(&self) -> u32 {
        u32::from_le_bytes([self.slice[4], self.slice[5], self.slice[6], 0])
    }

    pub fn serial_number(&self) -> u64 {
        u64::from_le_bytes([
            self.slice[7],
            self.slice[8],
            self.slice[9],
            self.slice[10],
            self.slice[11],
            0,
            0,
            0,
        ])
    }
}

/// Packet layout descriptor derived from the sensor metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketFormat {
    profile: LidarProfile,
    columns_per_frame: usize,
    pixels_per_column: usize,
    columns_per_packet: usize,
    packet_header_size: usize,
    col_header_size: usize,
    pixel_size: usize,
    col_footer_size: usize,
    packet_footer_size: usize,
}

impl PacketFormat {
    pub fn new(
        profile: LidarProfile,
        columns_per_frame: usize,
        pixels_per_column: usize,
        columns_per_packet: usize,
    ) -> Self {
        let (packet_header_size, col_header_size, pixel_size, col_footer_size, packet_footer_size) =
            match profile {
                LidarProfile::Legacy => (0, 16, 12, 4, 0),
                LidarProfile::SingleReturn => (Header::LEN, 12, 12, 0, 32),
                LidarProfile::LowDataRate => (Header::LEN, 12, 4, 0, 32),
            };

        Self {
            profile,
            columns_per_frame,
            pixels_per_column,
            columns_per_packet,
            packet_header_size,
            col_header_size,
            pixel_size,
            col_footer_size,
            packet_footer_size,
        }
    }

    pub fn profile(&self) -> LidarProfile {
        self.profile
    }

    pub fn columns_per_frame(&self) -> usize {
        self.columns_per_frame
    }

    pub fn pixels_per_column(&self) -> usize {
        self.pixels_per_column
    }

    pub fn columns_per_packet(&self) -> usize {
        self.columns_per_packet
    }

    /// Bytes occupied by one column block.
    pub fn column_size(&self) -> usize {
        self.col_header_size + self.pixels_per_column * self.pixel_size + self.col_footer_size
    }

    /// Exact size of a lidar packet in this format.
    pub fn lidar_packet_size(&self) -> usize {
        self.packet_header_size
            + self.columns_per_packet * self.column_size()
            + self.packet_footer_size
    }

    pub fn imu_packet_size(&self) -> usize {
        IMU_PACKET_SIZE
    }

    /// Validate a lidar packet and return its frame id.
    ///
    /// Checks the size, the packet header and that every column index lies
    /// inside the frame. Nothing is written, so a packet rejected here can
    /// never corrupt a scan.
    pub fn validate(&self, packet: &[u8]) -> Result<u16, Error> {
        let expected = self.lidar_packet_size();
        if packet.len() != expected {
            return Err(Error::InvalidPacket(format!(
                "lidar packet is {} bytes, expected {}",
                packet.len(),
                expected
            )));
        }

        let frame_id = self.frame_id(packet)?;

        for i in 0..self.columns_per_packet {
            let measurement_id = self.column(packet, i).measurement_id();
            if measurement_id as usize >= self.columns_per_frame {
                return Err(Error::ColumnOutOfRange(measurement_id));
            }
        }

        Ok(frame_id)
    }

    /// Frame id of the packet: the packet header for the non-legacy
    /// profiles, the first column header for `LEGACY`.
    pub fn frame_id(&self, packet: &[u8]) -> Result<u16, Error> {
        match self.profile {
            LidarProfile::Legacy => {
                if packet.len() < self.col_header_size {
                    return Err(Error::UnexpectedEnd(packet.len()));
                }
                Ok(u16::from_le_bytes([packet[10], packet[11]]))
            }
            _ => Ok(HeaderSlice::from_slice(packet)?.frame_id()),
        }
    }

    /// View of column `index` within a packet already checked by
    /// [`PacketFormat::validate`].
    pub fn column<'a>(&'a self, packet: &'a [u8], index: usize) -> ColumnSlice<'a> {
        let start = self.packet_header_size + index * self.column_size();
        ColumnSlice {
            format: self,
            slice: &packet[start..start + self.column_size()],
        }
    }
}

/// Borrowed view of one column block.
#[derive(Copy, Clone, Debug)]
pub struct ColumnSlice<'a> {
    format: &'a PacketFormat,
    slice: &'a [u8],
}

impl ColumnSlice<'_> {
    /// Capture time in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        u64::from_le_bytes(self.slice[0..8].try_into().unwrap_or_default())
    }

    pub fn measurement_id(&self) -> u16 {
        u16::from_le_bytes([self.slice[8], self.slice[9]])
    }

    /// Whether the sensor marked this column as carrying valid data.
    pub fn is_valid(&self) -> bool {
        match self.format.profile {
            LidarProfile::Legacy => {
                let end = self.slice.len();
                u32::from_le_bytes(self.slice[end - 4..end].try_into().unwrap_or_default())
                    == 0xffff_ffff
            }
            _ => u16::from_le_bytes([self.slice[10], self.slice[11]]) & 0x01 != 0,
        }
    }

    #[inline]
    fn pixel(&self, px: usize) -> &[u8] {
        let start = self.format.col_header_size + px * self.format.pixel_size;
        &self.slice[start..start + self.format.pixel_size]
    }

    /// Range in millimeters, zero for no return.
    #[inline]
    pub fn range(&self, px: usize) -> u32 {
        let p = self.pixel(px);
        match self.format.profile {
            LidarProfile::Legacy => u32::from_le_bytes([p[0], p[1], p[2], p[3]]) & 0x000f_ffff,
            LidarProfile::SingleReturn => {
                u32::from_le_bytes([p[0], p[1], p[2], p[3]]) & 0x0007_ffff
            }
            LidarProfile::LowDataRate => (u16::from_le_bytes([p[0], p[1]]) & 0x7fff) as u32 * 8,
        }
    }

    #[inline]
    pub fn reflectivity(&self, px: usize) -> u16 {
        let p = self.pixel(px);
        match self.format.profile {
            LidarProfile::Legacy => u16::from_le_bytes([p[4], p[5]]),
            LidarProfile::SingleReturn => p[4] as u16,
            LidarProfile::LowDataRate => p[2] as u16,
        }
    }

    #[inline]
    pub fn signal(&self, px: usize) -> u16 {
        let p = self.pixel(px);
        match self.format.profile {
            LidarProfile::Legacy | LidarProfile::SingleReturn => u16::from_le_bytes([p[6], p[7]]),
            LidarProfile::LowDataRate => 0,
        }
    }

    #[inline]
    pub fn near_ir(&self, px: usize) -> u16 {
        let p = self.pixel(px);
        match self.format.profile {
            LidarProfile::Legacy | LidarProfile::SingleReturn => u16::from_le_bytes([p[8], p[9]]),
            LidarProfile::LowDataRate => p[3] as u16,
        }
    }
}

/// Borrowed view of a `LEGACY` IMU packet.
#[derive(Copy, Clone, Debug)]
pub struct ImuSlice<'a> {
    slice: &'a [u8],
}

impl<'a> ImuSlice<'a> {
    pub fn from_slice(slice: &'a [u8]) -> Result<ImuSlice<'a>, Error> {
        if slice.len() != IMU_PACKET_SIZE {
            return Err(Error::InvalidPacket(format!(
                "imu packet is {} bytes, expected {}",
                slice.len(),
                IMU_PACKET_SIZE
            )));
        }
        Ok(ImuSlice { slice })
    }

    fn u64_at(&self, offset: usize) -> u64 {
        u64::from_le_bytes(
            self.slice[offset..offset + 8]
                .try_into()
                .unwrap_or_default(),
        )
    }

    fn f32_at(&self, offset: usize) -> f32 {
        f32::from_le_bytes(
            self.slice[offset..offset + 4]
                .try_into()
                .unwrap_or_default(),
        )
    }

    pub fn sys_timestamp(&self) -> u64 {
        self.u64_at(0)
    }

    pub fn accel_timestamp(&self) -> u64 {
        self.u64_at(8)
    }

    pub fn gyro_timestamp(&self) -> u64 {
        self.u64_at(16)
    }

    /// Linear acceleration in g.
    pub fn accel(&self) -> [f32; 3] {
        [self.f32_at(24), self.f32_at(28), self.f32_at(32)]
    }

    /// Angular velocity in degrees per second.
    pub fn gyro(&self) -> [f32; 3] {
        [self.f32_at(36), self.f32_at(40), self.f32_at(44)]
    }
}

/// Synthesizes lidar packets in any supported profile.
///
/// Used by the tests and benchmarks, and handy for driving the pipeline
/// without a sensor. Every column starts valid with all ranges zero.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    format: PacketFormat,
    buf: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(format: &PacketFormat) -> Self {
        let mut builder = Self {
            format: format.clone(),
            buf: vec![0u8; format.lidar_packet_size()],
        };

        if format.profile != LidarProfile::Legacy {
            builder.buf[0..2].copy_from_slice(&LIDAR_PACKET_TYPE.to_le_bytes());
        }

        for col in 0..format.columns_per_packet {
            builder.set_valid(col, true);
        }

        builder
    }

    fn column_start(&self, col: usize) -> usize {
        self.format.packet_header_size + col * self.format.column_size()
    }

    /// Set the frame id of every column (`LEGACY`) or of the packet header.
    pub fn frame_id(&mut self, frame_id: u16) -> &mut Self {
        match self.format.profile {
            LidarProfile::Legacy => {
                for col in 0..self.format.columns_per_packet {
                    let start = self.column_start(col) + 10;
                    self.buf[start..start + 2].copy_from_slice(&frame_id.to_le_bytes());
                }
            }
            _ => self.buf[2..4].copy_from_slice(&frame_id.to_le_bytes()),
        }
        self
    }

    /// Set the measurement index and capture time of column `col`.
    pub fn column(&mut self, col: usize, measurement_id: u16, timestamp: u64) -> &mut Self {
        let start = self.column_start(col);
        self.buf[start..start + 8].copy_from_slice(&timestamp.to_le_bytes());
        self.buf[start + 8..start + 10].copy_from_slice(&measurement_id.to_le_bytes());
        self
    }

    pub fn set_valid(&mut self, col: usize, valid: bool) -> &mut Self {
        let start = self.column_start(col);
        match self.format.profile {
            LidarProfile::Legacy => {
                let end = start + self.format.column_size();
                let status: u32 = if valid { 0xffff_ffff } else { 0 };
                self.buf[end - 4..end].copy_from_slice(&status.to_le_bytes());
            }
            _ => {
                let status: u16 = if valid { 0x01 } else { 0 };
                self.buf[start + 10..start + 12].copy_from_slice(&status.to_le_bytes());
            }
        }
        self
    }

    /// Write one pixel. `range` is in millimeters; the low data rate profile
    /// stores it in 8 mm units and drops `signal`.
    pub fn pixel(
        &mut self,
        col: usize,
        px: usize,
        range: u32,
        signal: u16,
        reflectivity: u16,
        near_ir: u16,
    ) -> &mut Self {
        let start =
            self.column_start(col) + self.format.col_header_size + px * self.format.pixel_size;
        let p = &mut self.buf[start..start + self.format.pixel_size];
        match self.format.profile {
            LidarProfile::Legacy => {
                p[0..4].copy_from_slice(&(range & 0x000f_ffff).to_le_bytes());
                p[4..6].copy_from_slice(&reflectivity.to_le_bytes());
                p[6..8].copy_from_slice(&signal.to_le_bytes());
                p[8..10].copy_from_slice(&near_ir.to_le_bytes());
            }
            LidarProfile::SingleReturn => {
                p[0..4].copy_from_slice(&(range & 0x0007_ffff).to_le_bytes());
                p[4] = reflectivity.min(255) as u8;
                p[6..8].copy_from_slice(&signal.to_le_bytes());
                p[8..10].copy_from_slice(&near_ir.to_le_bytes());
            }
            LidarProfile::LowDataRate => {
                let units = ((range / 8) & 0x7fff) as u16;
                p[0..2].copy_from_slice(&units.to_le_bytes());
                p[2] = reflectivity.min(255) as u8;
                p[3] = near_ir.min(255) as u8;
            }
        }
        self
    }

    /// Fill every pixel of column `col` with the same measurement.
    pub fn fill(&mut self, col: usize, range: u32, signal: u16, reflectivity: u16) -> &mut Self {
        for px in 0..self.format.pixels_per_column {
            self.pixel(col, px, range, signal, reflectivity, 0);
        }
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

/// Encode a `LEGACY` IMU packet.
pub fn build_imu_packet(gyro_timestamp: u64, accel: [f32; 3], gyro: [f32; 3]) -> Vec<u8> {
    let mut buf = vec![0u8; IMU_PACKET_SIZE];
    buf[0..8].copy_from_slice(&gyro_timestamp.to_le_bytes());
    buf[8..16].copy_from_slice(&gyro_timestamp.to_le_bytes());
    buf[16..24].copy_from_slice(&gyro_timestamp.to_le_bytes());
    for (i, v) in accel.iter().chain(gyro.iter()).enumerate() {
        let offset = 24 + i * 4;
        buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }
    buf
}
