// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet-to-cloud processing chains.
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ packet   │──►│ ScanBatcher │──►│ scan stamp   │──►│scan_to_cloud│──► PointCloud
//! └──────────┘   └─────────────┘   └──────┬───────┘   └──────┬──────┘
//!                                         │ none: drop       │
//!                                         ▼                  ▼
//!                                                     StreamHealth::tick
//! ```
//!
//! Both pipelines are synchronous and own all of their state; the caller
//! drives each one from a single task.

use crate::{
    batcher::{BatcherStats, IncompletePolicy, ScanBatcher},
    cloud::{PointCloud, scan_to_cloud},
    health::{HealthConfig, StreamHealth},
    imu::ImuSample,
    lidar::Error,
    lut::XyzLut,
    ouster::SensorMetadata,
    packet::PacketFormat,
};
use tracing::{debug, info_span, trace, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub packets: u64,
    /// Packets rejected as malformed.
    pub rejected_packets: u64,
    /// Completed scans dropped for lack of a valid timestamp.
    pub untimed_scans: u64,
    pub clouds: u64,
}

impl PipelineStats {
    /// Whether a statistics report is due, once every `every` packets.
    ///
    /// Counted on packets rather than clouds so reports keep coming while
    /// scans are being dropped.
    pub fn report_due(&self, every: u64) -> bool {
        every > 0 && self.packets > 0 && self.packets % every == 0
    }
}

pub struct LidarPipeline {
    batcher: ScanBatcher,
    lut: XyzLut,
    cloud: PointCloud,
    health: StreamHealth,
    stats: PipelineStats,
}

impl LidarPipeline {
    pub fn new(
        metadata: &SensorMetadata,
        policy: IncompletePolicy,
        health: HealthConfig,
    ) -> Result<Self, Error> {
        let format = metadata.packet_format()?;
        let batcher = ScanBatcher::with_column_window(format, policy, metadata.column_window())?;
        let lut = XyzLut::from_metadata(metadata)?;
        let health = StreamHealth::new(health, metadata.timestamp_mode);
        Self::from_batcher(batcher, lut, health)
    }

    /// Assemble a pipeline from explicit parts. The LUT must match the
    /// packet format's grid.
    pub fn from_parts(
        format: PacketFormat,
        lut: XyzLut,
        policy: IncompletePolicy,
        health: StreamHealth,
    ) -> Result<Self, Error> {
        Self::from_batcher(ScanBatcher::new(format, policy), lut, health)
    }

    pub fn from_batcher(
        batcher: ScanBatcher,
        lut: XyzLut,
        health: StreamHealth,
    ) -> Result<Self, Error> {
        let format = batcher.format();
        let width = format.columns_per_frame();
        let height = format.pixels_per_column();
        if lut.width() != width || lut.height() != height {
            return Err(Error::Config(format!(
                "lut is {}x{} but packets carry a {}x{} grid",
                lut.width(),
                lut.height(),
                width,
                height
            )));
        }

        Ok(Self {
            batcher,
            lut,
            cloud: PointCloud::new(width, height),
            health,
            stats: PipelineStats::default(),
        })
    }

    /// Feed one lidar packet.
    ///
    /// Returns the projected cloud when the packet completed a scan with a
    /// valid timestamp. The cloud is borrowed until the next call.
    pub fn process(&mut self, packet: &[u8]) -> Option<&PointCloud> {
        self.stats.packets += 1;

        match self.batcher.ingest(packet) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                self.stats.rejected_packets += 1;
                debug!("dropping lidar packet: {}", err);
                return None;
            }
        }

        let scan = self.batcher.scan();
        let Some(timestamp) = scan.timestamp() else {
            self.stats.untimed_scans += 1;
            warn!("dropping scan {} without valid timestamp", scan.frame_id());
            return None;
        };

        let projected = info_span!("project", frame_id = scan.frame_id())
            .in_scope(|| scan_to_cloud(scan, timestamp, &self.lut, &mut self.cloud));
        if let Err(err) = projected {
            warn!("dropping scan {}: {}", scan.frame_id(), err);
            return None;
        }

        self.health.tick(timestamp);
        if let Err(err) = self.health.update() {
            debug!("health update failed: {}", err);
        }

        self.stats.clouds += 1;
        trace!(
            "scan {} at {} with {}/{} columns",
            scan.frame_id(),
            timestamp,
            scan.valid_columns(),
            scan.width()
        );

        Some(&self.cloud)
    }

    /// Record the lidar queue depth for the backlog check.
    pub fn observe_backlog(&mut self, depth: usize, capacity: usize) {
        self.health.observe_backlog(depth, capacity);
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn batcher_stats(&self) -> &BatcherStats {
        self.batcher.stats()
    }

    pub fn health(&self) -> &StreamHealth {
        &self.health
    }

    pub fn lut(&self) -> &XyzLut {
        &self.lut
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImuStats {
    pub samples: u64,
    pub rejected_packets: u64,
}

/// Decode path for IMU packets.
#[derive(Default)]
pub struct ImuPipeline {
    stats: ImuStats,
}

impl ImuPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, packet: &[u8]) -> Option<ImuSample> {
        match ImuSample::from_packet(packet) {
            Ok(sample) => {
                self.stats.samples += 1;
                Some(sample)
            }
            Err(err) => {
                self.stats.rejected_packets += 1;
                debug!("dropping imu packet: {}", err);
                None
            }
        }
    }

    pub fn stats(&self) -> &ImuStats {
        &self.stats
    }
}
