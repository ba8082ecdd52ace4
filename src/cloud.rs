// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Reusable point cloud buffer and the scan projector.
//!
//! [`PointCloud`] stores one organized cloud in a structure-of-arrays (SoA)
//! layout, one entry per grid cell at linear index `row * width + col`:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     PointCloud                        │
//! │   x, y, z: [f32]        meters, NaN for no return    │
//! │   signal: [u16]         published as intensity       │
//! │   reflectivity: [u16]                                │
//! │   near_ir: [u16]        published as ambient         │
//! │   range: [u32]          millimeters                  │
//! │   t: [u32]              ns since scan timestamp      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Buffers are allocated once for the grid size and overwritten by every
//! call to [`scan_to_cloud`].
//!
//! # Example
//!
//! ```
//! use edgefirst_cloudpub::{
//!     cloud::{PointCloud, scan_to_cloud},
//!     lut::{RANGE_UNIT, XyzLut},
//!     scan::LidarScan,
//! };
//!
//! let lut = XyzLut::from_parts(2, 1, RANGE_UNIT, vec![[1.0, 0.0, 0.0]; 2], None).unwrap();
//! let mut scan = LidarScan::new(2, 1);
//! scan.set_pixel(0, 0, 2_500, 0, 0, 0);
//!
//! let mut cloud = PointCloud::new(2, 1);
//! scan_to_cloud(&scan, 0, &lut, &mut cloud).unwrap();
//! // Column 0 was never written, so it is an empty point.
//! assert!(cloud.x()[0].is_nan());
//! ```

use crate::{lidar::Error, lut::XyzLut, scan::LidarScan};

/// Organized point cloud in SoA layout.
#[derive(Debug, Clone)]
pub struct PointCloud {
    width: usize,
    height: usize,
    timestamp: u64,
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    signal: Vec<u16>,
    reflectivity: Vec<u16>,
    near_ir: Vec<u16>,
    range: Vec<u32>,
    t: Vec<u32>,
}

impl PointCloud {
    /// Allocate a cloud for a `width × height` grid.
    pub fn new(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            width,
            height,
            timestamp: 0,
            x: vec![f32::NAN; n],
            y: vec![f32::NAN; n],
            z: vec![f32::NAN; n],
            signal: vec![0; n],
            reflectivity: vec![0; n],
            near_ir: vec![0; n],
            range: vec![0; n],
            t: vec![0; n],
        }
    }

    /// Number of points, always `width * height`.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Scan timestamp in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub fn x(&self) -> &[f32] {
        &self.x
    }

    #[inline]
    pub fn y(&self) -> &[f32] {
        &self.y
    }

    #[inline]
    pub fn z(&self) -> &[f32] {
        &self.z
    }

    #[inline]
    pub fn signal(&self) -> &[u16] {
        &self.signal
    }

    #[inline]
    pub fn reflectivity(&self) -> &[u16] {
        &self.reflectivity
    }

    #[inline]
    pub fn near_ir(&self) -> &[u16] {
        &self.near_ir
    }

    /// Range in millimeters.
    #[inline]
    pub fn range(&self) -> &[u32] {
        &self.range
    }

    /// Per-point time offset from the scan timestamp, in nanoseconds.
    #[inline]
    pub fn t(&self) -> &[u32] {
        &self.t
    }

    /// Beam index of the point at `index`.
    #[inline]
    pub fn ring(&self, index: usize) -> u16 {
        (index / self.width.max(1)) as u16
    }

    /// Whether the point at `index` is the empty-point sentinel.
    #[inline]
    pub fn is_empty_point(&self, index: usize) -> bool {
        self.x[index].is_nan()
    }

    /// Number of points carrying a return.
    pub fn valid_points(&self) -> usize {
        self.x.iter().filter(|x| !x.is_nan()).count()
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Project a scan into `cloud` using the direction table.
///
/// Each cell with range `r` maps to `r * range_unit * direction + offset`.
/// Cells from missing or invalid columns, or with a zero range, get NaN
/// coordinates; their auxiliary channels are still copied. Nothing is
/// allocated once `cloud` has the scan's dimensions.
pub fn scan_to_cloud(
    scan: &LidarScan,
    timestamp: u64,
    lut: &XyzLut,
    cloud: &mut PointCloud,
) -> Result<(), Error> {
    let width = scan.width();
    let height = scan.height();

    if lut.width() != width || lut.height() != height {
        return Err(Error::Config(format!(
            "lut is {}x{} but scan is {}x{}",
            lut.width(),
            lut.height(),
            width,
            height
        )));
    }

    if cloud.width != width || cloud.height != height {
        *cloud = PointCloud::new(width, height);
    }

    cloud.timestamp = timestamp;
    let range_unit = lut.range_unit();
    let headers = scan.headers();

    for row in 0..height {
        for (col, header) in headers.iter().enumerate() {
            let index = row * width + col;
            let raw = scan.range()[[row, col]];

            cloud.range[index] = raw;
            cloud.signal[index] = scan.signal()[[row, col]];
            cloud.reflectivity[index] = scan.reflectivity()[[row, col]];
            cloud.near_ir[index] = scan.near_ir()[[row, col]];
            cloud.t[index] = if header.timestamp == 0 {
                0
            } else {
                header
                    .timestamp
                    .saturating_sub(timestamp)
                    .min(u32::MAX as u64) as u32
            };

            if !header.valid || raw == 0 {
                cloud.x[index] = f32::NAN;
                cloud.y[index] = f32::NAN;
                cloud.z[index] = f32::NAN;
                continue;
            }

            let r = raw as f64 * range_unit;
            let d = lut.direction(index);
            let o = lut.offset(index);
            cloud.x[index] = (r * d[0] + o[0]) as f32;
            cloud.y[index] = (r * d[1] + o[1]) as f32;
            cloud.z[index] = (r * d[2] + o[2]) as f32;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lut::RANGE_UNIT, scan::ColumnHeader};

    fn valid(col: usize, timestamp: u64) -> ColumnHeader {
        ColumnHeader {
            timestamp,
            measurement_id: col as u16,
            valid: true,
        }
    }

    fn lut_with_offset() -> XyzLut {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let direction = vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [s, s, 0.0], [0.0, 0.0, -1.0]];
        let offset = vec![[0.01, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0, 0.0, 0.03], [0.0; 3]];
        XyzLut::from_parts(2, 2, RANGE_UNIT, direction, Some(offset)).unwrap()
    }

    #[test]
    fn test_projection_is_range_times_direction_plus_offset() {
        let lut = lut_with_offset();
        let mut scan = LidarScan::new(2, 2);
        scan.set_header(0, valid(0, 100));
        scan.set_header(1, valid(1, 150));
        scan.set_pixel(0, 0, 1_000, 1, 2, 3);
        scan.set_pixel(0, 1, 2_000, 4, 5, 6);
        scan.set_pixel(1, 0, 4_000, 7, 8, 9);
        scan.set_pixel(1, 1, 500, 10, 11, 12);

        let mut cloud = PointCloud::new(2, 2);
        scan_to_cloud(&scan, 100, &lut, &mut cloud).unwrap();

        let expected = [
            [1.01f32, 0.0, 0.0],
            [0.0, 2.02, 0.0],
            [
                (4.0 * std::f64::consts::FRAC_1_SQRT_2) as f32,
                (4.0 * std::f64::consts::FRAC_1_SQRT_2) as f32,
                0.03,
            ],
            [0.0, 0.0, -0.5],
        ];
        for (i, p) in expected.iter().enumerate() {
            assert!((cloud.x()[i] - p[0]).abs() < 1e-6, "x[{}]", i);
            assert!((cloud.y()[i] - p[1]).abs() < 1e-6, "y[{}]", i);
            assert!((cloud.z()[i] - p[2]).abs() < 1e-6, "z[{}]", i);
        }

        assert_eq!(cloud.signal(), &[1, 4, 7, 10]);
        assert_eq!(cloud.reflectivity(), &[2, 5, 8, 11]);
        assert_eq!(cloud.near_ir(), &[3, 6, 9, 12]);
        assert_eq!(cloud.range(), &[1_000, 2_000, 4_000, 500]);
        assert_eq!(cloud.t(), &[0, 50, 0, 50]);
        assert_eq!(cloud.ring(3), 1);
        assert_eq!(cloud.timestamp(), 100);
        assert_eq!(cloud.valid_points(), 4);
    }

    #[test]
    fn test_no_return_is_sentinel_not_offset() {
        let lut = lut_with_offset();
        let mut scan = LidarScan::new(2, 2);
        scan.set_header(0, valid(0, 1));
        scan.set_header(1, valid(1, 1));
        scan.set_pixel(0, 0, 0, 42, 0, 0);

        let mut cloud = PointCloud::new(2, 2);
        scan_to_cloud(&scan, 1, &lut, &mut cloud).unwrap();

        // Offset is non-zero for this pixel, a zero range must not land on it.
        assert!(cloud.is_empty_point(0));
        assert!(cloud.y()[0].is_nan() && cloud.z()[0].is_nan());
        assert_eq!(cloud.signal()[0], 42);
        assert_eq!(cloud.valid_points(), 0);
    }

    #[test]
    fn test_invalid_column_is_sentinel() {
        let lut = lut_with_offset();
        let mut scan = LidarScan::new(2, 2);
        scan.set_header(0, valid(0, 10));
        scan.set_header(
            1,
            ColumnHeader {
                timestamp: 0,
                measurement_id: 1,
                valid: false,
            },
        );
        for row in 0..2 {
            for col in 0..2 {
                scan.set_pixel(row, col, 3_000, 1, 1, 1);
            }
        }

        let mut cloud = PointCloud::new(2, 2);
        scan_to_cloud(&scan, 10, &lut, &mut cloud).unwrap();

        assert!(!cloud.is_empty_point(0));
        assert!(cloud.is_empty_point(1));
        assert!(!cloud.is_empty_point(2));
        assert!(cloud.is_empty_point(3));
        assert_eq!(cloud.range()[1], 3_000);
        assert_eq!(cloud.t()[1], 0);
    }

    #[test]
    fn test_projection_is_deterministic() {
        let altitude: Vec<f64> = (0..8).map(|i| 10.0 - 2.5 * i as f64).collect();
        let azimuth = vec![-1.2; 8];
        let lut = XyzLut::new(
            32,
            8,
            RANGE_UNIT,
            &nalgebra::Matrix4::identity(),
            &nalgebra::Matrix4::identity(),
            &azimuth,
            &altitude,
        )
        .unwrap();

        let mut scan = LidarScan::new(32, 8);
        for col in 0..32 {
            scan.set_header(col, valid(col, 1_000 + col as u64));
            for row in 0..8 {
                scan.set_pixel(row, col, 1 + (row * 32 + col) as u32 * 37, 0, 0, 0);
            }
        }

        let mut a = PointCloud::new(32, 8);
        let mut b = PointCloud::new(32, 8);
        scan_to_cloud(&scan, 1_000, &lut, &mut a).unwrap();
        scan_to_cloud(&scan, 1_000, &lut, &mut b).unwrap();

        for i in 0..a.len() {
            assert_eq!(a.x()[i].to_bits(), b.x()[i].to_bits());
            assert_eq!(a.y()[i].to_bits(), b.y()[i].to_bits());
            assert_eq!(a.z()[i].to_bits(), b.z()[i].to_bits());
        }
    }

    #[test]
    fn test_size_mismatch() {
        let lut = lut_with_offset();
        let scan = LidarScan::new(4, 2);
        let mut cloud = PointCloud::default();
        assert!(matches!(
            scan_to_cloud(&scan, 0, &lut, &mut cloud),
            Err(Error::Config(_))
        ));

        // A cloud of the wrong size is reshaped to the scan.
        let scan = LidarScan::new(2, 2);
        scan_to_cloud(&scan, 0, &lut, &mut cloud).unwrap();
        assert_eq!(cloud.len(), 4);
        assert_eq!(cloud.width(), 2);
    }
}
