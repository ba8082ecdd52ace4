// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-pixel direction lookup table.
//!
//! Each pixel `(row, col)` of the measurement grid is assigned a unit
//! direction vector and a fixed origin offset in the sensor frame, so that
//! a range `r` in meters projects to `r * direction + offset`. The table is
//! built once from the beam intrinsics and never mutated afterwards, which
//! makes it safe to share between threads.

use crate::{lidar::Error, ouster::SensorMetadata};
use nalgebra::{Matrix4, Vector3};
use std::f64::consts::PI;

/// Conversion from raw range units (millimeters) to meters.
pub const RANGE_UNIT: f64 = 0.001;

#[derive(Clone, Debug, PartialEq)]
pub struct XyzLut {
    width: usize,
    height: usize,
    range_unit: f64,
    direction: Vec<[f64; 3]>,
    offset: Vec<[f64; 3]>,
}

impl XyzLut {
    /// Build the table for a sensor from its metadata.
    pub fn from_metadata(metadata: &SensorMetadata) -> Result<Self, Error> {
        Self::new(
            metadata.columns_per_frame(),
            metadata.pixels_per_column(),
            RANGE_UNIT,
            &metadata.beam_to_lidar_transform(),
            &metadata.lidar_to_sensor_transform,
            &metadata.beam_intrinsics.beam_azimuth_angles,
            &metadata.beam_intrinsics.beam_altitude_angles,
        )
    }

    /// Build the table from beam geometry.
    ///
    /// Angles are in degrees, one per row. `beam_to_lidar` and `transform`
    /// carry translations in millimeters; `transform` maps the lidar frame
    /// into the output frame.
    pub fn new(
        width: usize,
        height: usize,
        range_unit: f64,
        beam_to_lidar: &Matrix4<f64>,
        transform: &Matrix4<f64>,
        azimuth_angles_deg: &[f64],
        altitude_angles_deg: &[f64],
    ) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::Config(format!(
                "invalid lut size {}x{}",
                width, height
            )));
        }
        if azimuth_angles_deg.len() != height || altitude_angles_deg.len() != height {
            return Err(Error::Config(format!(
                "lut needs {} beam angles, got {} azimuth and {} altitude",
                height,
                azimuth_angles_deg.len(),
                altitude_angles_deg.len()
            )));
        }

        let beam_x = beam_to_lidar[(0, 3)];
        let beam_z = beam_to_lidar[(2, 3)];
        let beam_offset = (beam_x * beam_x + beam_z * beam_z).sqrt();

        let rotation = transform.fixed_view::<3, 3>(0, 0).into_owned();
        let translation: Vector3<f64> = transform.fixed_view::<3, 1>(0, 3).into_owned();

        let mut direction = Vec::with_capacity(width * height);
        let mut offset = Vec::with_capacity(width * height);

        for row in 0..height {
            let azimuth = -azimuth_angles_deg[row] * PI / 180.0;
            let altitude = altitude_angles_deg[row] * PI / 180.0;

            for col in 0..width {
                let encoder = 2.0 * PI - (col as f64 * 2.0 * PI / width as f64);

                let d = Vector3::new(
                    (encoder + azimuth).cos() * altitude.cos(),
                    (encoder + azimuth).sin() * altitude.cos(),
                    altitude.sin(),
                );
                let o = Vector3::new(
                    encoder.cos() * beam_x - d.x * beam_offset,
                    encoder.sin() * beam_x - d.y * beam_offset,
                    beam_z - d.z * beam_offset,
                );

                let d = rotation * d;
                let o = (rotation * o + translation) * range_unit;

                direction.push([d.x, d.y, d.z]);
                offset.push([o.x, o.y, o.z]);
            }
        }

        Ok(Self {
            width,
            height,
            range_unit,
            direction,
            offset,
        })
    }

    /// Build a table from explicit per-pixel vectors in row-major order.
    ///
    /// `offset` is in meters. Passing `None` yields a zero offset for every
    /// pixel.
    pub fn from_parts(
        width: usize,
        height: usize,
        range_unit: f64,
        direction: Vec<[f64; 3]>,
        offset: Option<Vec<[f64; 3]>>,
    ) -> Result<Self, Error> {
        let n = width * height;
        let offset = offset.unwrap_or_else(|| vec![[0.0; 3]; n]);
        if direction.len() != n || offset.len() != n {
            return Err(Error::Config(format!(
                "lut for {}x{} needs {} entries, got {} directions and {} offsets",
                width,
                height,
                n,
                direction.len(),
                offset.len()
            )));
        }

        Ok(Self {
            width,
            height,
            range_unit,
            direction,
            offset,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Meters per raw range unit.
    pub fn range_unit(&self) -> f64 {
        self.range_unit
    }

    /// Unit direction of the pixel at linear index `row * width + col`.
    #[inline]
    pub fn direction(&self, index: usize) -> [f64; 3] {
        self.direction[index]
    }

    /// Origin offset in meters of the pixel at linear index
    /// `row * width + col`.
    #[inline]
    pub fn offset(&self, index: usize) -> [f64; 3] {
        self.offset[index]
    }
}
