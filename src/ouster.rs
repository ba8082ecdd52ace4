// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ouster sensor metadata.
//!
//! The metadata is fetched once at startup, either from a `metadata.json`
//! file written by the Ouster SDK (flat layout) or from the sensor HTTP API
//! (`/api/v1/sensor/metadata`, nested layout). Both layouts are normalized
//! into [`SensorMetadata`], which is validated before any packet is
//! processed. Failures here are fatal: the publisher never starts with
//! partial metadata.

use crate::{
    lidar::Error,
    packet::{LidarProfile, PacketFormat},
};
use nalgebra::Matrix4;
use serde::Deserialize;
use std::{
    fmt,
    path::Path,
    str::FromStr,
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{debug, info};

const DEFAULT_UDP_PORT_LIDAR: u16 = 7502;
const DEFAULT_UDP_PORT_IMU: u16 = 7503;

/// Timeout applied to each individual HTTP request to the sensor.
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Sensor clock source, as reported in the sensor configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum TimestampMode {
    #[default]
    #[serde(rename = "TIME_FROM_INTERNAL_OSC")]
    Internal,
    #[serde(rename = "TIME_FROM_SYNC_PULSE_IN")]
    SyncPulse,
    #[serde(rename = "TIME_FROM_PTP_1588")]
    Ptp1588,
}

impl fmt::Display for TimestampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampMode::Internal => write!(f, "TIME_FROM_INTERNAL_OSC"),
            TimestampMode::SyncPulse => write!(f, "TIME_FROM_SYNC_PULSE_IN"),
            TimestampMode::Ptp1588 => write!(f, "TIME_FROM_PTP_1588"),
        }
    }
}

/// Lidar operating mode, `COLUMNSxHZ` (for example `1024x10`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct LidarMode {
    /// Columns per revolution.
    pub columns: usize,
    /// Revolutions per second.
    pub frequency: u32,
}

impl FromStr for LidarMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (columns, frequency) = s
            .split_once('x')
            .ok_or_else(|| Error::Config(format!("invalid lidar mode: {}", s)))?;

        let columns = columns
            .parse()
            .map_err(|_| Error::Config(format!("invalid lidar mode columns: {}", s)))?;
        let frequency = frequency
            .parse()
            .map_err(|_| Error::Config(format!("invalid lidar mode frequency: {}", s)))?;

        if columns == 0 || frequency == 0 {
            return Err(Error::Config(format!("invalid lidar mode: {}", s)));
        }

        Ok(LidarMode { columns, frequency })
    }
}

impl TryFrom<String> for LidarMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LidarMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.frequency)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SensorInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub build_rev: String,
    #[serde(default)]
    pub prod_sn: String,
    #[serde(default)]
    pub prod_pn: String,
    #[serde(default)]
    pub prod_line: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct LidarDataFormat {
    #[serde(default = "default_columns_per_packet")]
    pub columns_per_packet: usize,
    pub columns_per_frame: usize,
    pub pixels_per_column: usize,
    /// Inclusive `[first, last]` measurement ids the sensor sends. Absent
    /// means every column.
    #[serde(default)]
    pub column_window: Option<[usize; 2]>,
    #[serde(default = "default_profile")]
    pub udp_profile_lidar: String,
    #[serde(default = "default_profile")]
    pub udp_profile_imu: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BeamIntrinsics {
    /// Per-row elevation in degrees.
    pub beam_altitude_angles: Vec<f64>,
    /// Per-row azimuth offset in degrees.
    pub beam_azimuth_angles: Vec<f64>,
    /// Row-major 4x4, translation in millimeters.
    #[serde(default)]
    pub beam_to_lidar_transform: Option<Vec<f64>>,
    #[serde(default)]
    pub lidar_origin_to_beam_origin_mm: f64,
}

/// Validated sensor metadata, normalized from either JSON layout.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorMetadata {
    pub sensor_info: SensorInfo,
    pub lidar_mode: LidarMode,
    pub timestamp_mode: TimestampMode,
    pub lidar_data_format: LidarDataFormat,
    pub beam_intrinsics: BeamIntrinsics,
    /// Translation in millimeters.
    pub imu_to_sensor_transform: Matrix4<f64>,
    /// Translation in millimeters.
    pub lidar_to_sensor_transform: Matrix4<f64>,
    pub udp_port_lidar: u16,
    pub udp_port_imu: u16,
}

impl SensorMetadata {
    /// Parse and validate metadata from a JSON string in either layout.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Read, parse and validate a metadata file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Parse a JSON value, selecting the nested layout when a `sensor_info`
    /// object is present and the flat SDK layout otherwise.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let metadata = if value.get("sensor_info").is_some_and(|v| v.is_object()) {
            serde_json::from_value::<NestedMetadata>(value)?.try_into()?
        } else {
            serde_json::from_value::<FlatMetadata>(value)?.try_into()?
        };

        Self::validate(&metadata)?;
        Ok(metadata)
    }

    /// Columns per revolution (grid width).
    pub fn columns_per_frame(&self) -> usize {
        self.lidar_data_format.columns_per_frame
    }

    /// Pixels per column (grid height).
    pub fn pixels_per_column(&self) -> usize {
        self.lidar_data_format.pixels_per_column
    }

    /// Expected scan rate in Hz, derived from the lidar mode.
    pub fn expected_frequency(&self) -> u32 {
        self.lidar_mode.frequency
    }

    /// Beam to lidar transform, falling back to a pure X offset of
    /// `lidar_origin_to_beam_origin_mm` for sensors that do not report one.
    pub fn beam_to_lidar_transform(&self) -> Matrix4<f64> {
        match &self.beam_intrinsics.beam_to_lidar_transform {
            Some(m) => Matrix4::from_row_slice(m),
            None => {
                let mut m = Matrix4::identity();
                m[(0, 3)] = self.beam_intrinsics.lidar_origin_to_beam_origin_mm;
                m
            }
        }
    }

    /// Inclusive `[first, last]` azimuth window, `first > last` when it
    /// wraps through column 0.
    pub fn column_window(&self) -> [usize; 2] {
        self.lidar_data_format
            .column_window
            .unwrap_or([0, self.columns_per_frame() - 1])
    }

    /// Packet layout descriptor for the configured UDP profiles.
    pub fn packet_format(&self) -> Result<PacketFormat, Error> {
        let profile: LidarProfile = self.lidar_data_format.udp_profile_lidar.parse()?;
        Ok(PacketFormat::new(
            profile,
            self.columns_per_frame(),
            self.pixels_per_column(),
            self.lidar_data_format.columns_per_packet,
        ))
    }

    fn validate(&self) -> Result<(), Error> {
        let w = self.columns_per_frame();
        let h = self.pixels_per_column();

        if w == 0 || h == 0 {
            return Err(Error::Config(format!("invalid frame size {}x{}", w, h)));
        }

        if self.lidar_mode.columns != w {
            return Err(Error::Config(format!(
                "lidar mode {} does not match columns_per_frame {}",
                self.lidar_mode, w
            )));
        }

        let cpp = self.lidar_data_format.columns_per_packet;
        if cpp == 0 || cpp > w {
            return Err(Error::Config(format!(
                "invalid columns_per_packet {} for {} columns",
                cpp, w
            )));
        }

        if let Some([first, last]) = self.lidar_data_format.column_window {
            if first >= w || last >= w {
                return Err(Error::Config(format!(
                    "column window [{}, {}] outside of {} columns",
                    first, last, w
                )));
            }
        }

        if self.beam_intrinsics.beam_altitude_angles.len() != h {
            return Err(Error::Config(format!(
                "expected {} beam altitude angles, got {}",
                h,
                self.beam_intrinsics.beam_altitude_angles.len()
            )));
        }

        if self.beam_intrinsics.beam_azimuth_angles.len() != h {
            return Err(Error::Config(format!(
                "expected {} beam azimuth angles, got {}",
                h,
                self.beam_intrinsics.beam_azimuth_angles.len()
            )));
        }

        if let Some(m) = &self.beam_intrinsics.beam_to_lidar_transform {
            check_transform("beam_to_lidar_transform", m)?;
        }

        self.lidar_data_format
            .udp_profile_lidar
            .parse::<LidarProfile>()?;

        if self.lidar_data_format.udp_profile_imu != "LEGACY" {
            return Err(Error::UnsupportedProfile(
                self.lidar_data_format.udp_profile_imu.clone(),
            ));
        }

        Ok(())
    }
}

/// Fetch metadata from the sensor HTTP API.
///
/// Polls once per second until the sensor reports `RUNNING` or `timeout`
/// elapses. This call blocks; run it off the async runtime.
pub fn fetch_metadata(host: &str, timeout: Duration) -> Result<SensorMetadata, Error> {
    let url = format!("http://{}/api/v1/sensor/metadata", host);
    let start = Instant::now();

    loop {
        let value = ureq::get(&url)
            .timeout(HTTP_TIMEOUT)
            .call()?
            .into_json::<serde_json::Value>()?;
        let metadata = SensorMetadata::from_value(value)?;
        debug!("{:?}", metadata.sensor_info);

        if metadata.sensor_info.status == "RUNNING" {
            info!(
                "{} {} ({}) running {} in {}",
                metadata.sensor_info.prod_line,
                metadata.sensor_info.prod_sn,
                metadata.sensor_info.build_rev,
                metadata.lidar_mode,
                metadata.lidar_data_format.udp_profile_lidar
            );
            return Ok(metadata);
        }

        if start.elapsed() >= timeout {
            return Err(Error::Config(format!(
                "sensor status is {} after {:?}",
                metadata.sensor_info.status, timeout
            )));
        }

        info!(
            "waiting for lidar to initialize, status {}",
            metadata.sensor_info.status
        );
        sleep(Duration::from_secs(1));
    }
}

/// Layout of the `metadata.json` file written by the Ouster SDK.
#[derive(Deserialize)]
struct FlatMetadata {
    #[serde(flatten)]
    sensor_info: SensorInfo,
    #[serde(flatten)]
    beam_intrinsics: BeamIntrinsics,
    lidar_mode: LidarMode,
    #[serde(default)]
    timestamp_mode: TimestampMode,
    data_format: LidarDataFormat,
    #[serde(default = "identity_transform")]
    imu_to_sensor_transform: Vec<f64>,
    #[serde(default = "identity_transform")]
    lidar_to_sensor_transform: Vec<f64>,
    #[serde(default = "default_udp_port_lidar")]
    udp_port_lidar: u16,
    #[serde(default = "default_udp_port_imu")]
    udp_port_imu: u16,
}

impl TryFrom<FlatMetadata> for SensorMetadata {
    type Error = Error;

    fn try_from(flat: FlatMetadata) -> Result<Self, Self::Error> {
        Ok(SensorMetadata {
            sensor_info: flat.sensor_info,
            lidar_mode: flat.lidar_mode,
            timestamp_mode: flat.timestamp_mode,
            lidar_data_format: flat.data_format,
            beam_intrinsics: flat.beam_intrinsics,
            imu_to_sensor_transform: to_matrix(
                "imu_to_sensor_transform",
                &flat.imu_to_sensor_transform,
            )?,
            lidar_to_sensor_transform: to_matrix(
                "lidar_to_sensor_transform",
                &flat.lidar_to_sensor_transform,
            )?,
            udp_port_lidar: flat.udp_port_lidar,
            udp_port_imu: flat.udp_port_imu,
        })
    }
}

/// Layout served by `/api/v1/sensor/metadata`.
#[derive(Deserialize)]
struct NestedMetadata {
    sensor_info: SensorInfo,
    beam_intrinsics: BeamIntrinsics,
    #[serde(default)]
    imu_intrinsics: ImuIntrinsics,
    #[serde(default)]
    lidar_intrinsics: LidarIntrinsics,
    lidar_data_format: LidarDataFormat,
    config_params: ConfigParams,
}

#[derive(Deserialize)]
struct ImuIntrinsics {
    imu_to_sensor_transform: Vec<f64>,
}

impl Default for ImuIntrinsics {
    fn default() -> Self {
        Self {
            imu_to_sensor_transform: identity_transform(),
        }
    }
}

#[derive(Deserialize)]
struct LidarIntrinsics {
    lidar_to_sensor_transform: Vec<f64>,
}

impl Default for LidarIntrinsics {
    fn default() -> Self {
        Self {
            lidar_to_sensor_transform: identity_transform(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigParams {
    lidar_mode: LidarMode,
    #[serde(default)]
    timestamp_mode: TimestampMode,
    #[serde(default = "default_udp_port_lidar")]
    udp_port_lidar: u16,
    #[serde(default = "default_udp_port_imu")]
    udp_port_imu: u16,
}

impl TryFrom<NestedMetadata> for SensorMetadata {
    type Error = Error;

    fn try_from(nested: NestedMetadata) -> Result<Self, Self::Error> {
        Ok(SensorMetadata {
            sensor_info: nested.sensor_info,
            lidar_mode: nested.config_params.lidar_mode,
            timestamp_mode: nested.config_params.timestamp_mode,
            lidar_data_format: nested.lidar_data_format,
            beam_intrinsics: nested.beam_intrinsics,
            imu_to_sensor_transform: to_matrix(
                "imu_to_sensor_transform",
                &nested.imu_intrinsics.imu_to_sensor_transform,
            )?,
            lidar_to_sensor_transform: to_matrix(
                "lidar_to_sensor_transform",
                &nested.lidar_intrinsics.lidar_to_sensor_transform,
            )?,
            udp_port_lidar: nested.config_params.udp_port_lidar,
            udp_port_imu: nested.config_params.udp_port_imu,
        })
    }
}

fn check_transform(name: &str, m: &[f64]) -> Result<(), Error> {
    if m.len() != 16 {
        return Err(Error::Config(format!(
            "{} must have 16 elements, got {}",
            name,
            m.len()
        )));
    }
    Ok(())
}

fn to_matrix(name: &str, m: &[f64]) -> Result<Matrix4<f64>, Error> {
    check_transform(name, m)?;
    Ok(Matrix4::from_row_slice(m))
}

fn identity_transform() -> Vec<f64> {
    Matrix4::<f64>::identity().iter().copied().collect()
}

fn default_columns_per_packet() -> usize {
    16
}

fn default_profile() -> String {
    "LEGACY".to_string()
}

fn default_udp_port_lidar() -> u16 {
    DEFAULT_UDP_PORT_LIDAR
}

fn default_udp_port_imu() -> u16 {
    DEFAULT_UDP_PORT_IMU
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat_json(rows: usize) -> serde_json::Value {
        json!({
            "prod_line": "OS-1-16",
            "prod_sn": "992109000123",
            "build_rev": "v2.1.2",
            "status": "RUNNING",
            "lidar_mode": "512x20",
            "timestamp_mode": "TIME_FROM_PTP_1588",
            "beam_altitude_angles": vec![0.0; rows],
            "beam_azimuth_angles": vec![-3.0; rows],
            "lidar_origin_to_beam_origin_mm": 12.163,
            "imu_to_sensor_transform":
                [1, 0, 0, 6.253, 0, 1, 0, -11.775, 0, 0, 1, 7.645, 0, 0, 0, 1],
            "lidar_to_sensor_transform":
                [-1, 0, 0, 0, 0, -1, 0, 0, 0, 0, 1, 36.18, 0, 0, 0, 1],
            "data_format": {
                "columns_per_frame": 512,
                "pixels_per_column": 16,
                "columns_per_packet": 16,
                "column_window": [0, 511],
            }
        })
    }

    #[test]
    fn test_lidar_mode_parse() {
        let mode: LidarMode = "1024x20".parse().unwrap();
        assert_eq!(mode.columns, 1024);
        assert_eq!(mode.frequency, 20);
        assert_eq!(mode.to_string(), "1024x20");

        let mode: LidarMode = "4096x5".parse().unwrap();
        assert_eq!(mode.frequency, 5);

        assert!("1024".parse::<LidarMode>().is_err());
        assert!("axb".parse::<LidarMode>().is_err());
        assert!("0x10".parse::<LidarMode>().is_err());
    }

    #[test]
    fn test_flat_metadata() {
        let metadata = SensorMetadata::from_value(flat_json(16)).unwrap();
        assert_eq!(metadata.columns_per_frame(), 512);
        assert_eq!(metadata.pixels_per_column(), 16);
        assert_eq!(metadata.expected_frequency(), 20);
        assert_eq!(metadata.timestamp_mode, TimestampMode::Ptp1588);
        assert_eq!(metadata.udp_port_lidar, 7502);
        assert_eq!(metadata.udp_port_imu, 7503);
        assert_eq!(metadata.lidar_data_format.udp_profile_lidar, "LEGACY");
        assert_eq!(metadata.imu_to_sensor_transform[(0, 3)], 6.253);
        assert_eq!(metadata.imu_to_sensor_transform[(3, 3)], 1.0);
        assert_eq!(metadata.lidar_to_sensor_transform[(2, 3)], 36.18);
        assert_eq!(metadata.lidar_to_sensor_transform[(0, 0)], -1.0);
    }

    #[test]
    fn test_default_beam_to_lidar_transform() {
        let metadata = SensorMetadata::from_value(flat_json(16)).unwrap();
        let m = metadata.beam_to_lidar_transform();
        assert_eq!(m[(0, 3)], 12.163);
        assert_eq!(m[(2, 3)], 0.0);
        assert_eq!(m[(1, 1)], 1.0);
    }

    #[test]
    fn test_identity_transform_default() {
        let m = Matrix4::from_row_slice(&identity_transform());
        assert_eq!(m, Matrix4::identity());
    }

    #[test]
    fn test_beam_count_mismatch() {
        let result = SensorMetadata::from_value(flat_json(8));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_mode_width_mismatch() {
        let mut value = flat_json(16);
        value["lidar_mode"] = json!("1024x10");
        assert!(matches!(
            SensorMetadata::from_value(value),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unsupported_profile() {
        let mut value = flat_json(16);
        value["data_format"]["udp_profile_lidar"] = json!("RNG19_RFL8_SIG16_NIR16_DUAL");
        assert!(matches!(
            SensorMetadata::from_value(value),
            Err(Error::UnsupportedProfile(_))
        ));
    }

    #[test]
    fn test_bad_transform_length() {
        let mut value = flat_json(16);
        value["imu_to_sensor_transform"] = json!([1, 0, 0]);
        assert!(matches!(
            SensorMetadata::from_value(value),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unparseable_metadata() {
        assert!(matches!(
            SensorMetadata::from_json("{ not json"),
            Err(Error::Json(_))
        ));
        assert!(SensorMetadata::from_json("{}").is_err());
    }

    #[test]
    fn test_nested_metadata() {
        let value = json!({
            "sensor_info": {
                "status": "INITIALIZING",
                "prod_line": "OS-0-32",
                "prod_sn": "122201000999",
                "build_rev": "v3.0.1"
            },
            "beam_intrinsics": {
                "beam_altitude_angles": vec![1.0; 32],
                "beam_azimuth_angles": vec![0.0; 32],
                "beam_to_lidar_transform":
                    [1, 0, 0, 27.116, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1],
                "lidar_origin_to_beam_origin_mm": 27.116
            },
            "imu_intrinsics": {
                "imu_to_sensor_transform":
                    [1, 0, 0, 6.253, 0, 1, 0, -11.775, 0, 0, 1, 7.645, 0, 0, 0, 1]
            },
            "lidar_data_format": {
                "columns_per_frame": 2048,
                "pixels_per_column": 32,
                "columns_per_packet": 16,
                "udp_profile_lidar": "RNG19_RFL8_SIG16_NIR16",
                "udp_profile_imu": "LEGACY"
            },
            "config_params": {
                "lidar_mode": "2048x10",
                "udp_port_lidar": 7602,
                "udp_port_imu": 7603
            }
        });

        let metadata = SensorMetadata::from_value(value).unwrap();
        assert_eq!(metadata.sensor_info.status, "INITIALIZING");
        assert_eq!(metadata.columns_per_frame(), 2048);
        assert_eq!(metadata.pixels_per_column(), 32);
        assert_eq!(metadata.udp_port_lidar, 7602);
        assert_eq!(metadata.udp_port_imu, 7603);
        assert_eq!(metadata.timestamp_mode, TimestampMode::Internal);
        assert_eq!(metadata.lidar_to_sensor_transform, Matrix4::identity());
        assert_eq!(metadata.beam_to_lidar_transform()[(0, 3)], 27.116);
        assert_eq!(
            metadata.packet_format().unwrap().profile(),
            LidarProfile::SingleReturn
        );
    }
    #[test]
    fn test_column_window() {
        let metadata = SensorMetadata::from_value(flat_json(16)).unwrap();
        assert_eq!(metadata.column_window(), [0, 511]);

        let mut value = flat_json(16);
        value["data_format"]
            .as_object_mut()
            .unwrap()
            .remove("column_window");
        let metadata = SensorMetadata::from_value(value).unwrap();
        assert_eq!(metadata.lidar_data_format.column_window, None);
        assert_eq!(metadata.column_window(), [0, 511]);

        let mut value = flat_json(16);
        value["data_format"]["column_window"] = json!([400, 100]);
        let metadata = SensorMetadata::from_value(value).unwrap();
        assert_eq!(metadata.column_window(), [400, 100]);

        let mut value = flat_json(16);
        value["data_format"]["column_window"] = json!([0, 512]);
        assert!(SensorMetadata::from_value(value).is_err());
    }
}
