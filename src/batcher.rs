// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet to scan batching.
//!
//! [`ScanBatcher`] folds lidar packets, in arrival order, into a reusable
//! [`LidarScan`]. Completion is tracked with a per-column bitmap:
//!
//! ```text
//!            ingest(packet)
//!                 │
//!        ┌────────▼─────────┐  frame id changed   ┌──────────────────────┐
//!        │ same revolution? ├────────────────────►│ IncompletePolicy     │
//!        └────────┬─────────┘                     │  Emit: stash packet, │
//!                 │ yes                           │        complete      │
//!        ┌────────▼─────────┐                     │  Discard: reset and  │
//!        │ write columns,   │                     │        continue      │
//!        │ update bitmap    │                     └──────────────────────┘
//!        └────────┬─────────┘
//!                 │ bitmap full
//!                 ▼
//!              complete
//! ```
//!
//! After `ingest` returns `true` the scan is readable through
//! [`ScanBatcher::scan`]. Bookkeeping is reset lazily by the next `ingest`
//! call, so the completed grid stays intact until the caller is done with it.

use crate::{lidar::Error, packet::PacketFormat, scan::LidarScan};
use clap::ValueEnum;
use std::fmt;
use tracing::{debug, trace};

/// What to do with a revolution that wraps before all of its columns
/// arrived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum IncompletePolicy {
    /// Complete the partial scan; missing columns stay marked missing.
    #[default]
    Emit,
    /// Drop the partial scan and start the new revolution.
    Discard,
}

impl fmt::Display for IncompletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IncompletePolicy::Emit => write!(f, "emit"),
            IncompletePolicy::Discard => write!(f, "discard"),
        }
    }
}

/// Running counters, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Scans handed to the caller, complete or partial.
    pub scans: u64,
    /// Partial scans handed to the caller under [`IncompletePolicy::Emit`].
    pub incomplete_scans: u64,
    /// Partial scans dropped under [`IncompletePolicy::Discard`].
    pub discarded_scans: u64,
    pub duplicate_columns: u64,
    pub invalid_columns: u64,
    /// Packets of an already completed revolution.
    pub stale_packets: u64,
}

pub struct ScanBatcher {
    format: PacketFormat,
    policy: IncompletePolicy,
    scan: LidarScan,
    /// Columns written since the last completion.
    written: Vec<bool>,
    n_written: usize,
    /// Columns the sensor sends, from its azimuth window.
    expected: Vec<bool>,
    n_expected: usize,
    /// Expected columns written since the last completion.
    n_expected_written: usize,
    /// Frame id of the revolution being accumulated.
    frame_id: Option<u16>,
    /// Frame id of the last revolution handed out.
    completed_frame: Option<u16>,
    needs_reset: bool,
    /// Packet that opened the next revolution while the previous one was
    /// being completed.
    pending: Vec<u8>,
    pending_frame: Option<u16>,
    stats: BatcherStats,
}

impl ScanBatcher {
    pub fn new(format: PacketFormat, policy: IncompletePolicy) -> Self {
        let width = format.columns_per_frame();
        let height = format.pixels_per_column();

        Self {
            expected: vec![true; width],
            n_expected: width,
            n_expected_written: 0,
            pending: Vec::with_capacity(format.lidar_packet_size()),
            format,
            policy,
            scan: LidarScan::new(width, height),
            written: vec![false; width],
            n_written: 0,
            frame_id: None,
            completed_frame: None,
            needs_reset: false,
            pending_frame: None,
            stats: BatcherStats::default(),
        }
    }

    /// Batcher for a sensor that only sends the columns of an azimuth
    /// window, given as inclusive `[first, last]` measurement ids.
    ///
    /// A window with `first > last` wraps through column 0. A scan completes
    /// once every column inside the window was written.
    pub fn with_column_window(
        format: PacketFormat,
        policy: IncompletePolicy,
        window: [usize; 2],
    ) -> Result<Self, Error> {
        let width = format.columns_per_frame();
        let [first, last] = window;
        if first >= width || last >= width {
            return Err(Error::Config(format!(
                "column window [{}, {}] outside of {} columns",
                first, last, width
            )));
        }

        let mut batcher = Self::new(format, policy);
        for (col, expected) in batcher.expected.iter_mut().enumerate() {
            *expected = if first <= last {
                (first..=last).contains(&col)
            } else {
                col >= first || col <= last
            };
        }
        batcher.n_expected = batcher.expected.iter().filter(|&&e| e).count();
        Ok(batcher)
    }

    /// Consume one lidar packet.
    ///
    /// Returns `Ok(true)` when this packet completed a scan, available from
    /// [`ScanBatcher::scan`] until the next call. Malformed packets are
    /// rejected with an error and leave the batcher untouched.
    pub fn ingest(&mut self, packet: &[u8]) -> Result<bool, Error> {
        let frame_id = self.format.validate(packet)?;

        if self.needs_reset {
            self.reset();

            if let Some(pending_frame) = self.pending_frame.take() {
                let pending = std::mem::take(&mut self.pending);
                let completed = self.accumulate(&pending, pending_frame);
                self.pending = pending;

                if completed {
                    // The stashed packet completed a scan on its own, hold
                    // the current one back for the next call.
                    self.stash(packet, frame_id);
                    return Ok(true);
                }
            }
        }

        Ok(self.accumulate(packet, frame_id))
    }

    /// The grid being accumulated, or the completed scan right after
    /// [`ScanBatcher::ingest`] returned `true`.
    pub fn scan(&self) -> &LidarScan {
        &self.scan
    }

    pub fn stats(&self) -> &BatcherStats {
        &self.stats
    }

    pub fn format(&self) -> &PacketFormat {
        &self.format
    }

    pub fn policy(&self) -> IncompletePolicy {
        self.policy
    }

    /// Columns written since the last completion.
    pub fn columns_written(&self) -> usize {
        self.n_written
    }

    fn accumulate(&mut self, packet: &[u8], frame_id: u16) -> bool {
        if self.completed_frame == Some(frame_id) {
            self.stats.stale_packets += 1;
            trace!("dropping stale packet for frame {}", frame_id);
            return false;
        }

        match self.frame_id {
            None => {
                self.frame_id = Some(frame_id);
                self.scan.set_frame_id(frame_id);
            }
            Some(current) if current != frame_id => {
                debug!(
                    "frame {} wrapped to {} with {}/{} columns",
                    current,
                    frame_id,
                    self.n_expected_written,
                    self.n_expected
                );

                return match self.policy {
                    IncompletePolicy::Emit => {
                        self.stats.incomplete_scans += 1;
                        self.stash(packet, frame_id);
                        self.complete();
                        true
                    }
                    IncompletePolicy::Discard => {
                        self.stats.discarded_scans += 1;
                        // Late packets of the dropped revolution are stale.
                        self.completed_frame = self.frame_id;
                        self.reset();
                        self.accumulate(packet, frame_id)
                    }
                };
            }
            Some(_) => {}
        }

        for i in 0..self.format.columns_per_packet() {
            let column = self.format.column(packet, i);
            let col = column.measurement_id() as usize;

            if !column.is_valid() {
                self.stats.invalid_columns += 1;
            }

            self.scan.write_column(&column);

            if self.written[col] {
                self.stats.duplicate_columns += 1;
            } else {
                self.written[col] = true;
                self.n_written += 1;
                if self.expected[col] {
                    self.n_expected_written += 1;
                }
            }
        }

        if self.n_expected_written == self.n_expected {
            self.complete();
            return true;
        }

        false
    }

    fn complete(&mut self) {
        self.stats.scans += 1;
        self.completed_frame = self.frame_id;
        self.needs_reset = true;
    }

    fn reset(&mut self) {
        self.scan.reset_headers();
        self.written.fill(false);
        self.n_written = 0;
        self.n_expected_written = 0;
        self.frame_id = None;
        self.needs_reset = false;
    }

    fn stash(&mut self, packet: &[u8], frame_id: u16) {
        self.pending.clear();
        self.pending.extend_from_slice(packet);
        self.pending_frame = Some(frame_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{LidarProfile, PacketBuilder};

    const W: usize = 8;
    const H: usize = 4;

    fn format(columns_per_packet: usize) -> PacketFormat {
        PacketFormat::new(LidarProfile::Legacy, W, H, columns_per_packet)
    }

    fn packet(format: &PacketFormat, frame: u16, col: u16, range: u32) -> Vec<u8> {
        let mut builder = PacketBuilder::new(format);
        builder
            .frame_id(frame)
            .column(0, col, 1_000 + col as u64)
            .fill(0, range, 10, 20);
        builder.build()
    }

    #[test]
    fn test_full_revolution_in_order() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        for col in 0..W as u16 {
            let done = batcher.ingest(&packet(&format, 1, col, 1_000)).unwrap();
            assert_eq!(done, col as usize == W - 1, "column {}", col);
        }

        let scan = batcher.scan();
        assert_eq!(scan.valid_columns(), W);
        assert_eq!(scan.frame_id(), 1);
        assert_eq!(scan.timestamp(), Some(1_000));
        assert_eq!(batcher.stats().scans, 1);
        assert_eq!(batcher.stats().incomplete_scans, 0);
    }

    #[test]
    fn test_full_revolution_any_order() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);
        let order = [5u16, 2, 7, 0, 3, 6, 1, 4];

        let mut completions = 0;
        for (i, &col) in order.iter().enumerate() {
            if batcher.ingest(&packet(&format, 3, col, 500)).unwrap() {
                completions += 1;
                assert_eq!(i, order.len() - 1);
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(batcher.scan().valid_columns(), W);
    }

    #[test]
    fn test_multi_column_packets() {
        let format = format(4);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        for base in [4u16, 0] {
            let mut builder = PacketBuilder::new(&format);
            builder.frame_id(9);
            for i in 0..4 {
                builder.column(i, base + i as u16, 100 + (base as u64 + i as u64));
            }
            let done = batcher.ingest(builder.as_bytes()).unwrap();
            assert_eq!(done, base == 0);
        }

        assert_eq!(batcher.scan().timestamp(), Some(100));
    }

    #[test]
    fn test_wrap_emits_partial_scan() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        for col in 0..5 {
            assert!(!batcher.ingest(&packet(&format, 1, col, 1_111)).unwrap());
        }

        // Next revolution starts before columns 5..8 arrived.
        assert!(batcher.ingest(&packet(&format, 2, 0, 2_222)).unwrap());

        let scan = batcher.scan();
        assert_eq!(scan.frame_id(), 1);
        assert_eq!(scan.valid_columns(), 5);
        for col in 5..W {
            assert!(!scan.headers()[col].valid);
            assert_eq!(scan.headers()[col].timestamp, 0);
        }
        // Column 0 still holds the first revolution's data.
        assert_eq!(scan.range()[[0, 0]], 1_111);
        assert_eq!(batcher.stats().incomplete_scans, 1);

        // The stashed packet opens revolution 2.
        for col in 1..W as u16 {
            let done = batcher.ingest(&packet(&format, 2, col, 2_222)).unwrap();
            assert_eq!(done, col as usize == W - 1);
        }
        let scan = batcher.scan();
        assert_eq!(scan.frame_id(), 2);
        assert_eq!(scan.valid_columns(), W);
        assert_eq!(scan.range()[[0, 0]], 2_222);
    }

    #[test]
    fn test_wrap_discards_partial_scan() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Discard);

        for col in 0..3 {
            assert!(!batcher.ingest(&packet(&format, 1, col, 1)).unwrap());
        }
        assert!(!batcher.ingest(&packet(&format, 2, 0, 2)).unwrap());
        assert_eq!(batcher.stats().discarded_scans, 1);
        assert_eq!(batcher.columns_written(), 1);

        for col in 1..W as u16 {
            let done = batcher.ingest(&packet(&format, 2, col, 2)).unwrap();
            assert_eq!(done, col as usize == W - 1);
        }
        assert_eq!(batcher.scan().frame_id(), 2);
        assert_eq!(batcher.stats().scans, 1);
    }

    #[test]
    fn test_duplicate_column_last_write_wins() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        assert!(!batcher.ingest(&packet(&format, 1, 3, 100)).unwrap());
        assert!(!batcher.ingest(&packet(&format, 1, 3, 300)).unwrap());
        assert_eq!(batcher.columns_written(), 1);
        assert_eq!(batcher.stats().duplicate_columns, 1);
        assert_eq!(batcher.scan().range()[[0, 3]], 300);

        for col in [0u16, 1, 2, 4, 5, 6] {
            assert!(!batcher.ingest(&packet(&format, 1, col, 1)).unwrap());
        }
        assert!(batcher.ingest(&packet(&format, 1, 7, 1)).unwrap());
    }

    #[test]
    fn test_invalid_column_counts_toward_completion() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        for col in 0..W as u16 {
            let mut builder = PacketBuilder::new(&format);
            builder
                .frame_id(4)
                .column(0, col, 50 + col as u64)
                .fill(0, 1_000, 1, 1);
            if col == 0 {
                builder.set_valid(0, false);
            }
            let done = batcher.ingest(builder.as_bytes()).unwrap();
            assert_eq!(done, col as usize == W - 1);
        }

        let scan = batcher.scan();
        assert!(!scan.headers()[0].valid);
        assert_eq!(scan.headers()[0].timestamp, 0);
        assert_eq!(scan.valid_columns(), W - 1);
        assert_eq!(scan.timestamp(), Some(51));
        assert_eq!(batcher.stats().invalid_columns, 1);
    }

    #[test]
    fn test_malformed_packet_leaves_state() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        assert!(!batcher.ingest(&packet(&format, 1, 0, 1)).unwrap());
        let before = batcher.scan().headers().to_vec();

        assert!(batcher.ingest(&[0u8; 10]).is_err());

        let mut builder = PacketBuilder::new(&format);
        builder.frame_id(2).column(0, W as u16, 7);
        assert!(matches!(
            batcher.ingest(builder.as_bytes()),
            Err(Error::ColumnOutOfRange(_))
        ));

        assert_eq!(batcher.columns_written(), 1);
        assert_eq!(batcher.scan().headers(), &before[..]);
    }

    #[test]
    fn test_stale_packet_after_completion() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        for col in 0..W as u16 {
            batcher.ingest(&packet(&format, 1, col, 1)).unwrap();
        }
        assert_eq!(batcher.stats().scans, 1);

        // A late duplicate of revolution 1 must not open a new revolution.
        assert!(!batcher.ingest(&packet(&format, 1, 2, 1)).unwrap());
        assert_eq!(batcher.stats().stale_packets, 1);
        assert_eq!(batcher.columns_written(), 0);

        assert!(!batcher.ingest(&packet(&format, 2, 0, 1)).unwrap());
        assert_eq!(batcher.columns_written(), 1);
        assert_eq!(batcher.stats().incomplete_scans, 0);
    }

    #[test]
    fn test_single_packet_revolution_with_pending() {
        // A packet covering the whole frame completes on its own, including
        // when it was stashed by a wrap.
        let format = PacketFormat::new(LidarProfile::Legacy, 2, 1, 2);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Emit);

        let revolution = |frame: u16| {
            let mut builder = PacketBuilder::new(&format);
            builder.frame_id(frame).column(0, 0, 10).column(1, 1, 11);
            builder.build()
        };
        let mut partial = PacketBuilder::new(&format);
        partial.frame_id(1).column(0, 0, 10).column(1, 0, 10);

        assert!(!batcher.ingest(partial.as_bytes()).unwrap());
        assert!(batcher.ingest(&revolution(2)).unwrap());
        assert_eq!(batcher.scan().frame_id(), 1);

        assert!(batcher.ingest(&revolution(3)).unwrap());
        assert_eq!(batcher.scan().frame_id(), 2);
        assert_eq!(batcher.scan().valid_columns(), 2);

        assert!(batcher.ingest(&revolution(4)).unwrap());
        assert_eq!(batcher.scan().frame_id(), 3);
    }
    #[test]
    fn test_discard_late_packet_is_stale() {
        let format = format(1);
        let mut batcher = ScanBatcher::new(format.clone(), IncompletePolicy::Discard);

        for col in 0..7 {
            assert!(!batcher.ingest(&packet(&format, 1, col, 1)).unwrap());
        }
        assert!(!batcher.ingest(&packet(&format, 2, 0, 2)).unwrap());

        // The last column of revolution 1 shows up after revolution 2 began.
        assert!(!batcher.ingest(&packet(&format, 1, 7, 1)).unwrap());
        assert_eq!(batcher.stats().stale_packets, 1);
        assert_eq!(batcher.columns_written(), 1);

        let mut completions = 0;
        for col in 1..W as u16 {
            if batcher.ingest(&packet(&format, 2, col, 2)).unwrap() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(batcher.scan().frame_id(), 2);
        assert_eq!(batcher.stats().scans, 1);
        assert_eq!(batcher.stats().discarded_scans, 1);
    }

    #[test]
    fn test_column_window() {
        let format = format(1);
        let mut batcher =
            ScanBatcher::with_column_window(format.clone(), IncompletePolicy::Discard, [0, 3])
                .unwrap();

        for frame in 1..=5u16 {
            for col in 0..4u16 {
                let done = batcher.ingest(&packet(&format, frame, col, 10)).unwrap();
                assert_eq!(done, col == 3, "frame {} column {}", frame, col);
            }
            let scan = batcher.scan();
            assert_eq!(scan.frame_id(), frame);
            assert_eq!(scan.valid_columns(), 4);
            assert!(!scan.headers()[4].valid);
        }

        assert_eq!(batcher.stats().scans, 5);
        assert_eq!(batcher.stats().discarded_scans, 0);
        assert_eq!(batcher.stats().incomplete_scans, 0);
    }

    #[test]
    fn test_wrapping_column_window() {
        let format = format(1);
        let mut batcher =
            ScanBatcher::with_column_window(format.clone(), IncompletePolicy::Emit, [6, 1])
                .unwrap();

        for (i, col) in [0u16, 1, 6, 7].into_iter().enumerate() {
            let done = batcher.ingest(&packet(&format, 3, col, 10)).unwrap();
            assert_eq!(done, i == 3);
        }
        assert_eq!(batcher.scan().valid_columns(), 4);
        assert_eq!(batcher.stats().incomplete_scans, 0);

        assert!(
            ScanBatcher::with_column_window(format, IncompletePolicy::Emit, [0, W]).is_err()
        );
    }
}
