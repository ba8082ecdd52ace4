// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! IMU packet decoding into SI units.

use crate::{lidar::Error, packet::ImuSlice};

/// Standard gravity, m/s² per g.
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Diagonal of the angular velocity covariance, (rad/s)².
pub const ANGULAR_VELOCITY_VARIANCE: f64 = 6e-4;

/// Diagonal of the linear acceleration covariance, (m/s²)².
pub const LINEAR_ACCELERATION_VARIANCE: f64 = 0.01;

/// One inertial sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuSample {
    /// Gyroscope read time in nanoseconds.
    pub timestamp: u64,
    /// m/s²
    pub linear_acceleration: [f64; 3],
    /// rad/s
    pub angular_velocity: [f64; 3],
}

impl ImuSample {
    pub fn from_packet(packet: &[u8]) -> Result<Self, Error> {
        let imu = ImuSlice::from_slice(packet)?;
        let accel = imu.accel();
        let gyro = imu.gyro();

        Ok(Self {
            timestamp: imu.gyro_timestamp(),
            linear_acceleration: accel.map(|a| a as f64 * STANDARD_GRAVITY),
            angular_velocity: gyro.map(|g| (g as f64).to_radians()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::build_imu_packet;
    use std::f64::consts::PI;

    #[test]
    fn test_si_conversion() {
        let packet = build_imu_packet(42, [0.0, -0.5, 1.0], [180.0, 0.0, -90.0]);
        let sample = ImuSample::from_packet(&packet).unwrap();

        assert_eq!(sample.timestamp, 42);
        assert_eq!(sample.linear_acceleration[0], 0.0);
        assert!((sample.linear_acceleration[1] + 0.5 * STANDARD_GRAVITY).abs() < 1e-12);
        assert!((sample.linear_acceleration[2] - STANDARD_GRAVITY).abs() < 1e-12);
        assert!((sample.angular_velocity[0] - PI).abs() < 1e-12);
        assert!((sample.angular_velocity[2] + PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_packet() {
        assert!(matches!(
            ImuSample::from_packet(&[0u8; 47]),
            Err(Error::InvalidPacket(_))
        ));
    }
}
