// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! ROS2 message assembly for the published topics.

use crate::{
    cloud::PointCloud,
    formats::{POINT_STEP, format_points_into, ouster_point_fields},
    frames::StaticTransform,
    imu::{ANGULAR_VELOCITY_VARIANCE, ImuSample, LINEAR_ACCELERATION_VARIANCE},
};
use edgefirst_schemas::{
    builtin_interfaces::Time,
    geometry_msgs::{Quaternion, Transform, TransformStamped, Vector3},
    sensor_msgs::{IMU as Imu, PointCloud2},
    serde_cdr,
    std_msgs::Header,
};
use serde::Serialize;
use zenoh::bytes::{Encoding, ZBytes};

pub const POINT_CLOUD2_SCHEMA: &str = "sensor_msgs/msg/PointCloud2";
pub const IMU_SCHEMA: &str = "sensor_msgs/msg/Imu";
pub const TRANSFORM_STAMPED_SCHEMA: &str = "geometry_msgs/msg/TransformStamped";

/// Split a nanosecond timestamp into a ROS time.
pub fn time_from_nanos(nanos: u64) -> Time {
    Time {
        sec: (nanos / 1_000_000_000) as i32,
        nanosec: (nanos % 1_000_000_000) as u32,
    }
}

fn diagonal(value: f64) -> [f64; 9] {
    [value, 0.0, 0.0, 0.0, value, 0.0, 0.0, 0.0, value]
}

/// Build an organized PointCloud2 from a projected cloud.
///
/// `data` is a scratch buffer reused across scans; its contents are moved
/// into the message, so callers hand in the buffer returned by the previous
/// publish or an empty one.
pub fn cloud_to_msg(cloud: &PointCloud, frame_id: &str, mut data: Vec<u8>) -> PointCloud2 {
    data.resize(POINT_STEP * cloud.len(), 0);
    format_points_into(cloud, &mut data);

    PointCloud2 {
        header: Header {
            stamp: time_from_nanos(cloud.timestamp()),
            frame_id: frame_id.to_string(),
        },
        height: cloud.height() as u32,
        width: cloud.width() as u32,
        fields: ouster_point_fields(),
        is_bigendian: false,
        point_step: POINT_STEP as u32,
        row_step: (POINT_STEP * cloud.width()) as u32,
        data,
        is_dense: false,
    }
}

/// Build an Imu message. The sensor reports no orientation, which is
/// flagged with `orientation_covariance[0] = -1`.
pub fn imu_to_msg(sample: &ImuSample, frame_id: &str) -> Imu {
    let mut orientation_covariance = [0.0; 9];
    orientation_covariance[0] = -1.0;

    let [ax, ay, az] = sample.linear_acceleration;
    let [gx, gy, gz] = sample.angular_velocity;

    Imu {
        header: Header {
            stamp: time_from_nanos(sample.timestamp),
            frame_id: frame_id.to_string(),
        },
        orientation: Quaternion {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        },
        orientation_covariance,
        angular_velocity: Vector3 {
            x: gx,
            y: gy,
            z: gz,
        },
        angular_velocity_covariance: diagonal(ANGULAR_VELOCITY_VARIANCE),
        linear_acceleration: Vector3 {
            x: ax,
            y: ay,
            z: az,
        },
        linear_acceleration_covariance: diagonal(LINEAR_ACCELERATION_VARIANCE),
    }
}

pub fn transform_to_msg(transform: &StaticTransform, stamp: Time) -> TransformStamped {
    let [tx, ty, tz] = transform.translation;
    let [qx, qy, qz, qw] = transform.rotation;

    TransformStamped {
        header: Header {
            stamp,
            frame_id: transform.parent.clone(),
        },
        child_frame_id: transform.child.clone(),
        transform: Transform {
            translation: Vector3 {
                x: tx,
                y: ty,
                z: tz,
            },
            rotation: Quaternion {
                x: qx,
                y: qy,
                z: qz,
                w: qw,
            },
        },
    }
}

/// CDR-encode a message for publishing with its ROS2 schema name.
pub fn encode<T: Serialize>(msg: &T, schema: &str) -> Result<(ZBytes, Encoding), serde_cdr::Error> {
    let payload = ZBytes::from(serde_cdr::serialize(msg)?);
    let encoding = Encoding::APPLICATION_CDR.with_schema(schema.to_string());
    Ok((payload, encoding))
}
