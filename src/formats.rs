// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! PointCloud2 field layout and packed point serialization.
//!
//! Points are packed with a 30-byte stride, matching the field set of the
//! Ouster ROS driver's default point type:
//!
//! ```text
//! ┌───────┬───────┬───────┬───────────┬───────┬──────────┬──────┬─────────┬───────┐
//! │ x:f32 │ y:f32 │ z:f32 │ intensity │ t:u32 │ reflect. │ ring │ ambient │ range │
//! │       │       │       │ f32       │       │ u16      │ u16  │ u16     │ u32   │
//! │ 0     │ 4     │ 8     │ 12        │ 16    │ 20       │ 22   │ 24      │ 26    │
//! └───────┴───────┴───────┴───────────┴───────┴──────────┴──────┴─────────┴───────┘
//! ```
//!
//! On aarch64 the coordinates are moved with NEON lane extraction, other
//! targets use the scalar path.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

use crate::cloud::PointCloud;
use edgefirst_schemas::sensor_msgs::PointField;

/// Bytes per packed point.
pub const POINT_STEP: usize = 30;

/// Point field data types for PointCloud2 messages.
///
/// These values correspond to the ROS sensor_msgs/PointField datatype field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(dead_code)]
pub enum PointFieldType {
    INT8 = 1,
    UINT8 = 2,
    INT16 = 3,
    UINT16 = 4,
    INT32 = 5,
    UINT32 = 6,
    FLOAT32 = 7,
    FLOAT64 = 8,
}

fn field(name: &str, offset: u32, datatype: PointFieldType) -> PointField {
    PointField {
        name: String::from(name),
        offset,
        datatype: datatype as u8,
        count: 1,
    }
}

/// Field definitions for the packed layout written by
/// [`format_points_into`].
pub fn ouster_point_fields() -> Vec<PointField> {
    vec![
        field("x", 0, PointFieldType::FLOAT32),
        field("y", 4, PointFieldType::FLOAT32),
        field("z", 8, PointFieldType::FLOAT32),
        field("intensity", 12, PointFieldType::FLOAT32),
        field("t", 16, PointFieldType::UINT32),
        field("reflectivity", 20, PointFieldType::UINT16),
        field("ring", 22, PointFieldType::UINT16),
        field("ambient", 24, PointFieldType::UINT16),
        field("range", 26, PointFieldType::UINT32),
    ]
}

/// Serialize a cloud into a new buffer.
pub fn format_points(cloud: &PointCloud) -> Vec<u8> {
    let mut data = vec![0u8; POINT_STEP * cloud.len()];
    format_points_into(cloud, &mut data);
    data
}

#[inline]
fn write_channels(cloud: &PointCloud, index: usize, p: &mut [u8]) {
    p[12..16].copy_from_slice(&(cloud.signal()[index] as f32).to_le_bytes());
    p[16..20].copy_from_slice(&cloud.t()[index].to_le_bytes());
    p[20..22].copy_from_slice(&cloud.reflectivity()[index].to_le_bytes());
    p[22..24].copy_from_slice(&cloud.ring(index).to_le_bytes());
    p[24..26].copy_from_slice(&cloud.near_ir()[index].to_le_bytes());
    p[26..30].copy_from_slice(&cloud.range()[index].to_le_bytes());
}

/// Serialize a cloud into a pre-allocated buffer.
///
/// # Panics
///
/// Panics if `out` is shorter than `POINT_STEP * cloud.len()`.
#[cfg(target_arch = "aarch64")]
#[inline(never)]
pub fn format_points_into(cloud: &PointCloud, out: &mut [u8]) {
    let n_points = cloud.len();
    assert!(out.len() >= POINT_STEP * n_points);
    let n_simd = n_points - n_points % 4;
    let (x, y, z) = (cloud.x(), cloud.y(), cloud.z());

    // SAFETY: NEON intrinsics are always available on aarch64. Loads stay
    // below n_simd and every store lands inside the asserted output length.
    unsafe {
        let out_ptr = out.as_mut_ptr();

        for index in (0..n_simd).step_by(4) {
            let x_u32 = vreinterpretq_u32_f32(vld1q_f32(x.as_ptr().add(index)));
            let y_u32 = vreinterpretq_u32_f32(vld1q_f32(y.as_ptr().add(index)));
            let z_u32 = vreinterpretq_u32_f32(vld1q_f32(z.as_ptr().add(index)));

            let xs = [
                vgetq_lane_u32::<0>(x_u32),
                vgetq_lane_u32::<1>(x_u32),
                vgetq_lane_u32::<2>(x_u32),
                vgetq_lane_u32::<3>(x_u32),
            ];
            let ys = [
                vgetq_lane_u32::<0>(y_u32),
                vgetq_lane_u32::<1>(y_u32),
                vgetq_lane_u32::<2>(y_u32),
                vgetq_lane_u32::<3>(y_u32),
            ];
            let zs = [
                vgetq_lane_u32::<0>(z_u32),
                vgetq_lane_u32::<1>(z_u32),
                vgetq_lane_u32::<2>(z_u32),
                vgetq_lane_u32::<3>(z_u32),
            ];

            for lane in 0..4 {
                let p = out_ptr.add((index + lane) * POINT_STEP);
                (p as *mut u32).write_unaligned(xs[lane].to_le());
                (p.add(4) as *mut u32).write_unaligned(ys[lane].to_le());
                (p.add(8) as *mut u32).write_unaligned(zs[lane].to_le());
            }
        }
    }

    for index in 0..n_points {
        let p = &mut out[index * POINT_STEP..(index + 1) * POINT_STEP];
        if index >= n_simd {
            p[0..4].copy_from_slice(&x[index].to_le_bytes());
            p[4..8].copy_from_slice(&y[index].to_le_bytes());
            p[8..12].copy_from_slice(&z[index].to_le_bytes());
        }
        write_channels(cloud, index, p);
    }
}

/// Scalar implementation for non-aarch64 targets.
#[cfg(not(target_arch = "aarch64"))]
#[inline(never)]
pub fn format_points_into(cloud: &PointCloud, out: &mut [u8]) {
    let n_points = cloud.len();
    assert!(out.len() >= POINT_STEP * n_points);
    let (x, y, z) = (cloud.x(), cloud.y(), cloud.z());

    for (index, p) in out
        .chunks_exact_mut(POINT_STEP)
        .take(n_points)
        .enumerate()
    {
        p[0..4].copy_from_slice(&x[index].to_le_bytes());
        p[4..8].copy_from_slice(&y[index].to_le_bytes());
        p[8..12].copy_from_slice(&z[index].to_le_bytes());
        write_channels(cloud, index, p);
    }
}
