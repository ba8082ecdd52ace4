// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Ouster Point Cloud Publisher Library
//!
//! Turns the UDP packet streams of an Ouster OS sensor into organized point
//! clouds and IMU samples.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │  PacketSource   │ ──► │  ScanBatcher  │ ──► │  LidarScan      │
//! │  (UDP/test)     │     │  (bitmap)     │     │  (reused grid)  │
//! └─────────────────┘     └───────────────┘     └─────────────────┘
//!                                                       │
//!                          ┌────────────┐               ▼
//!                          │  XyzLut    │ ──► ┌─────────────────┐
//!                          │ (read-only)│     │  scan_to_cloud  │ ──► PointCloud
//!                          └────────────┘     └─────────────────┘
//! ```
//!
//! The grid, the cloud and the LUT are allocated once at startup from the
//! [`ouster::SensorMetadata`]; steady-state processing does not allocate
//! outside of message serialization.
//!
//! # Modules
//!
//! - [`lidar`]: Error type and clock helpers
//! - [`ouster`]: Sensor metadata parsing and retrieval
//! - [`packet`]: Packet layouts and zero-copy views
//! - [`lut`]: Per-pixel direction table
//! - [`scan`]: Measurement grid and scan timestamp
//! - [`batcher`]: Packet-to-scan batching
//! - [`cloud`]: Point cloud buffer and projection
//! - [`health`]: Stream health monitor
//! - [`imu`]: IMU sample decoding
//! - [`frames`]: Frame names and static transforms
//! - [`formats`]: PointCloud2 field layout and packing
//! - [`messages`]: ROS2 message assembly
//! - [`pipeline`]: Lidar and IMU processing chains
//! - [`packet_source`]: Packet sources and queue forwarding
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_cloudpub::{
//!     batcher::IncompletePolicy, health::HealthConfig, ouster::SensorMetadata,
//!     pipeline::LidarPipeline,
//! };
//!
//! let metadata = SensorMetadata::from_file("metadata.json")?;
//! let health = HealthConfig::new(metadata.expected_frequency() as f64);
//! let mut pipeline = LidarPipeline::new(&metadata, IncompletePolicy::Emit, health)?;
//!
//! loop {
//!     let len = socket.recv(&mut buf)?;
//!     if let Some(cloud) = pipeline.process(&buf[..len]) {
//!         let x = cloud.x();
//!         let ring = cloud.ring(0);
//!     }
//! }
//! ```

pub mod batcher;
pub mod cloud;
pub mod formats;
pub mod frames;
pub mod health;
pub mod imu;
pub mod lidar;
pub mod lut;
pub mod messages;
pub mod ouster;
pub mod packet;
pub mod packet_source;
pub mod pipeline;
pub mod scan;

// Re-exports for convenience
pub use batcher::{IncompletePolicy, ScanBatcher};
pub use cloud::{PointCloud, scan_to_cloud};
pub use formats::PointFieldType;
pub use lidar::Error;
pub use lut::XyzLut;
pub use ouster::SensorMetadata;
pub use packet_source::PacketSource;
pub use pipeline::{ImuPipeline, LidarPipeline};
pub use scan::LidarScan;
