// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Measurement grid for one revolution.
//!
//! Channels are stored as `height × width` arrays (row = beam, column =
//! measurement index) together with one [`ColumnHeader`] per column. The
//! grid is allocated once and reused across revolutions: the batcher only
//! resets the column headers between scans, cell storage is overwritten as
//! new columns arrive.

use crate::packet::ColumnSlice;
use ndarray::Array2;

/// Per-column metadata.
///
/// The default value is the "missing" marker: a column that has not been
/// written since the last reset has a zero timestamp and is invalid.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnHeader {
    /// Capture time in nanoseconds, zero when not populated.
    pub timestamp: u64,
    pub measurement_id: u16,
    /// Whether the column carries usable cell data.
    pub valid: bool,
}

#[derive(Clone, Debug)]
pub struct LidarScan {
    width: usize,
    height: usize,
    frame_id: u16,
    range: Array2<u32>,
    signal: Array2<u16>,
    reflectivity: Array2<u16>,
    near_ir: Array2<u16>,
    headers: Vec<ColumnHeader>,
}

impl LidarScan {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            frame_id: 0,
            range: Array2::zeros((height, width)),
            signal: Array2::zeros((height, width)),
            reflectivity: Array2::zeros((height, width)),
            near_ir: Array2::zeros((height, width)),
            headers: vec![ColumnHeader::default(); width],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Frame id of the revolution held by this grid.
    pub fn frame_id(&self) -> u16 {
        self.frame_id
    }

    pub fn headers(&self) -> &[ColumnHeader] {
        &self.headers
    }

    /// Range in millimeters, zero for no return.
    pub fn range(&self) -> &Array2<u32> {
        &self.range
    }

    pub fn signal(&self) -> &Array2<u16> {
        &self.signal
    }

    pub fn reflectivity(&self) -> &Array2<u16> {
        &self.reflectivity
    }

    pub fn near_ir(&self) -> &Array2<u16> {
        &self.near_ir
    }

    /// Number of columns flagged valid.
    pub fn valid_columns(&self) -> usize {
        self.headers.iter().filter(|h| h.valid).count()
    }

    /// Scan timestamp: the first non-zero column timestamp in index order.
    ///
    /// A zero timestamp marks a column whose timing was never populated
    /// (missing, invalid, or a sensor glitch). `None` means the scan has no
    /// usable time and must not be published.
    pub fn timestamp(&self) -> Option<u64> {
        first_valid_timestamp(&self.headers)
    }

    pub fn set_frame_id(&mut self, frame_id: u16) {
        self.frame_id = frame_id;
    }

    pub fn set_header(&mut self, col: usize, header: ColumnHeader) {
        self.headers[col] = header;
    }

    pub fn set_pixel(
        &mut self,
        row: usize,
        col: usize,
        range: u32,
        signal: u16,
        reflectivity: u16,
        near_ir: u16,
    ) {
        self.range[[row, col]] = range;
        self.signal[[row, col]] = signal;
        self.reflectivity[[row, col]] = reflectivity;
        self.near_ir[[row, col]] = near_ir;
    }

    /// Reset every column header to the missing marker. Cells are left as
    /// they are.
    pub fn reset_headers(&mut self) {
        self.headers.fill(ColumnHeader::default());
    }

    /// Copy a decoded column into its slot. Invalid columns keep their cells
    /// but lose their timestamp.
    pub(crate) fn write_column(&mut self, column: &ColumnSlice<'_>) {
        let col = column.measurement_id() as usize;
        let valid = column.is_valid();

        self.headers[col] = ColumnHeader {
            timestamp: if valid { column.timestamp() } else { 0 },
            measurement_id: column.measurement_id(),
            valid,
        };

        for px in 0..self.height {
            self.range[[px, col]] = column.range(px);
            self.signal[[px, col]] = column.signal(px);
            self.reflectivity[[px, col]] = column.reflectivity(px);
            self.near_ir[[px, col]] = column.near_ir(px);
        }
    }
}

/// Return the first non-zero timestamp in column order.
pub fn first_valid_timestamp(headers: &[ColumnHeader]) -> Option<u64> {
    headers
        .iter()
        .map(|h| h.timestamp)
        .find(|&timestamp| timestamp != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_scan_is_missing() {
        let scan = LidarScan::new(64, 16);
        assert_eq!(scan.range().dim(), (16, 64));
        assert_eq!(scan.headers().len(), 64);
        assert_eq!(scan.valid_columns(), 0);
        assert_eq!(scan.timestamp(), None);
    }

    #[test]
    fn test_timestamp_skips_zero() {
        let mut scan = LidarScan::new(4, 1);
        scan.set_header(
            1,
            ColumnHeader {
                timestamp: 1_500,
                measurement_id: 1,
                valid: true,
            },
        );
        scan.set_header(
            2,
            ColumnHeader {
                timestamp: 1_000,
                measurement_id: 2,
                valid: true,
            },
        );
        // Column order, not smallest value.
        assert_eq!(scan.timestamp(), Some(1_500));
    }

    #[test]
    fn test_timestamp_none() {
        let headers = vec![ColumnHeader::default(); 8];
        assert_eq!(first_valid_timestamp(&headers), None);
        assert_eq!(first_valid_timestamp(&[]), None);
    }

    #[test]
    fn test_reset_keeps_cells() {
        let mut scan = LidarScan::new(2, 2);
        scan.set_pixel(1, 1, 5_000, 10, 20, 30);
        scan.set_header(
            1,
            ColumnHeader {
                timestamp: 9,
                measurement_id: 1,
                valid: true,
            },
        );

        scan.reset_headers();
        assert_eq!(scan.headers()[1], ColumnHeader::default());
        assert_eq!(scan.range()[[1, 1]], 5_000);
        assert_eq!(scan.signal()[[1, 1]], 10);
        assert_eq!(scan.reflectivity()[[1, 1]], 20);
        assert_eq!(scan.near_ir()[[1, 1]], 30);
    }
}
