// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Coordinate frame names and the sensor's static transforms.

use crate::ouster::SensorMetadata;
use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion};

/// Millimeters to meters for transform translations.
const MM_TO_M: f64 = 0.001;

/// Frame identifiers for one sensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameNames {
    /// Point clouds are published in this frame.
    pub sensor: String,
    pub imu: String,
    pub lidar: String,
}

impl FrameNames {
    pub fn new(prefix: &str) -> Self {
        let prefix = normalize_prefix(prefix);
        Self {
            sensor: format!("{}os_sensor", prefix),
            imu: format!("{}os_imu", prefix),
            lidar: format!("{}os_lidar", prefix),
        }
    }
}

impl Default for FrameNames {
    fn default() -> Self {
        Self::new("")
    }
}

/// Append a `/` to a non-empty prefix that lacks one.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

/// A rigid transform between two named frames.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticTransform {
    pub parent: String,
    pub child: String,
    /// Meters.
    pub translation: [f64; 3],
    /// Quaternion as `[x, y, z, w]`.
    pub rotation: [f64; 4],
}

impl StaticTransform {
    /// Build from a 4×4 homogeneous transform with translation in
    /// millimeters.
    pub fn from_matrix(parent: &str, child: &str, matrix: &Matrix4<f64>) -> Self {
        let (translation, rotation) = decompose(matrix);
        Self {
            parent: parent.to_string(),
            child: child.to_string(),
            translation,
            rotation,
        }
    }
}

/// Split a 4×4 transform into a translation in meters and an `[x, y, z, w]`
/// quaternion.
pub fn decompose(matrix: &Matrix4<f64>) -> ([f64; 3], [f64; 4]) {
    let rotation: Matrix3<f64> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
    let rotation = Rotation3::from_matrix_unchecked(rotation);
    let q = UnitQuaternion::from_rotation_matrix(&rotation);

    (
        [
            matrix[(0, 3)] * MM_TO_M,
            matrix[(1, 3)] * MM_TO_M,
            matrix[(2, 3)] * MM_TO_M,
        ],
        [q.i, q.j, q.k, q.w],
    )
}

/// The sensor → imu and sensor → lidar transforms announced at startup.
pub fn static_transforms(metadata: &SensorMetadata, frames: &FrameNames) -> [StaticTransform; 2] {
    [
        StaticTransform::from_matrix(&frames.sensor, &frames.imu, &metadata.imu_to_sensor_transform),
        StaticTransform::from_matrix(
            &frames.sensor,
            &frames.lidar,
            &metadata.lidar_to_sensor_transform,
        ),
    ]
}
