// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Stream health monitoring.
//!
//! [`StreamHealth`] watches the timestamps of published scans and reports
//! cadence problems (rate off the expected frequency, gaps, timestamps going
//! backwards), sensor/host clock skew and consumer backlog. It is purely
//! observational: anomalies are logged on onset and recovery and returned in
//! a [`HealthReport`], publication is never held back.

use crate::{
    lidar::{Error, wall_clock},
    ouster::TimestampMode,
};
use std::{collections::VecDeque, time::Duration};
use tracing::{info, warn};

const NANOS_PER_SEC: f64 = 1e9;

/// Thresholds for [`StreamHealth`].
#[derive(Clone, Debug, PartialEq)]
pub struct HealthConfig {
    /// Expected scan rate in Hz, from the lidar mode.
    pub expected_hz: f64,
    /// Accepted relative deviation of the observed rate.
    pub tolerance: f64,
    /// Number of intervals averaged for the observed rate.
    pub window: usize,
    /// Largest accepted lag of a scan timestamp behind the host clock.
    pub max_clock_lag: Duration,
    /// Queue fill ratio at which the consumer is considered backlogged.
    pub backlog_ratio: f64,
}

impl HealthConfig {
    pub fn new(expected_hz: f64) -> Self {
        Self {
            expected_hz,
            ..Default::default()
        }
    }

    /// Expected interval between scans in nanoseconds.
    pub fn expected_period_ns(&self) -> u64 {
        if self.expected_hz > 0.0 {
            (NANOS_PER_SEC / self.expected_hz) as u64
        } else {
            0
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            expected_hz: 10.0,
            tolerance: 0.1,
            window: 10,
            max_clock_lag: Duration::from_secs(5),
            backlog_ratio: 0.75,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateStatus {
    /// Not enough scans observed yet.
    #[default]
    Unknown,
    Ok,
    TooLow,
    TooHigh,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HealthReport {
    /// Mean rate over the window.
    pub observed_hz: Option<f64>,
    pub rate: RateStatus,
    /// An interval above twice the expected period was seen.
    pub gap: bool,
    /// Lag of the latest scan timestamp behind the host clock, when above
    /// the threshold.
    pub clock_skew: Option<Duration>,
    /// A scan timestamp did not increase.
    pub non_monotonic: bool,
    pub backlog: bool,
}

impl HealthReport {
    /// True when no anomaly is flagged. An unknown rate is not an anomaly.
    pub fn is_ok(&self) -> bool {
        !matches!(self.rate, RateStatus::TooLow | RateStatus::TooHigh)
            && !self.gap
            && self.clock_skew.is_none()
            && !self.non_monotonic
            && !self.backlog
    }
}

pub struct StreamHealth {
    config: HealthConfig,
    timestamp_mode: TimestampMode,
    last_stamp: Option<u64>,
    intervals: VecDeque<u64>,
    gap: bool,
    non_monotonic: bool,
    backlog: bool,
    ticks: u64,
    last_report: HealthReport,
}

impl StreamHealth {
    pub fn new(config: HealthConfig, timestamp_mode: TimestampMode) -> Self {
        Self {
            intervals: VecDeque::with_capacity(config.window + 1),
            config,
            timestamp_mode,
            last_stamp: None,
            gap: false,
            non_monotonic: false,
            backlog: false,
            ticks: 0,
            last_report: HealthReport::default(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Number of scans observed.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Most recent report from [`StreamHealth::update`].
    pub fn last_report(&self) -> &HealthReport {
        &self.last_report
    }

    /// Record the timestamp of a published scan, in nanoseconds.
    pub fn tick(&mut self, stamp: u64) {
        self.ticks += 1;

        if let Some(last) = self.last_stamp {
            // Intervals are measured from the newest stamp seen.
            if stamp <= last {
                self.non_monotonic = true;
                return;
            }

            let interval = stamp - last;
            let period = self.config.expected_period_ns();
            if period > 0 && interval > 2 * period {
                self.gap = true;
            }

            self.intervals.push_back(interval);
            while self.intervals.len() > self.config.window.max(1) {
                self.intervals.pop_front();
            }
        }

        self.last_stamp = Some(stamp);
    }

    /// Record the depth of the queue feeding the scan consumer.
    pub fn observe_backlog(&mut self, depth: usize, capacity: usize) {
        self.backlog = capacity > 0 && depth as f64 >= self.config.backlog_ratio * capacity as f64;
    }

    /// Evaluate the stream against the host wall clock.
    pub fn update(&mut self) -> Result<HealthReport, Error> {
        Ok(self.update_at(wall_clock()?))
    }

    /// Evaluate the stream with `now` as the host time in nanoseconds.
    ///
    /// Gap and non-monotonic flags cover the ticks since the previous
    /// update and are cleared afterwards.
    pub fn update_at(&mut self, now: u64) -> HealthReport {
        let observed_hz = if self.intervals.is_empty() {
            None
        } else {
            let mean = self.intervals.iter().sum::<u64>() as f64 / self.intervals.len() as f64;
            Some(NANOS_PER_SEC / mean)
        };

        let rate = match observed_hz {
            None => RateStatus::Unknown,
            Some(_) if self.config.expected_hz <= 0.0 => RateStatus::Unknown,
            Some(hz) => {
                let limit = self.config.tolerance * self.config.expected_hz;
                if hz < self.config.expected_hz - limit {
                    RateStatus::TooLow
                } else if hz > self.config.expected_hz + limit {
                    RateStatus::TooHigh
                } else {
                    RateStatus::Ok
                }
            }
        };

        let clock_skew = self.last_stamp.and_then(|stamp| {
            let lag = Duration::from_nanos(now.saturating_sub(stamp));
            (lag > self.config.max_clock_lag).then_some(lag)
        });

        let report = HealthReport {
            observed_hz,
            rate,
            gap: self.gap,
            clock_skew,
            non_monotonic: self.non_monotonic,
            backlog: self.backlog,
        };

        self.log_transitions(&report, now);
        self.gap = false;
        self.non_monotonic = false;
        self.last_report = report.clone();

        report
    }

    fn log_transitions(&self, report: &HealthReport, now: u64) {
        let previous = &self.last_report;

        let rate_bad = |r: RateStatus| matches!(r, RateStatus::TooLow | RateStatus::TooHigh);
        if rate_bad(report.rate) && report.rate != previous.rate {
            warn!(
                "scan rate {:.2} Hz outside {:.2} Hz ± {:.0}%",
                report.observed_hz.unwrap_or_default(),
                self.config.expected_hz,
                self.config.tolerance * 100.0
            );
        } else if rate_bad(previous.rate) && report.rate == RateStatus::Ok {
            info!(
                "scan rate recovered: {:.2} Hz",
                report.observed_hz.unwrap_or_default()
            );
        }

        if report.gap && !previous.gap {
            warn!(
                "gap in scan stream, longer than {} ms",
                2 * self.config.expected_period_ns() / 1_000_000
            );
        } else if !report.gap && previous.gap {
            info!("scan stream gap cleared");
        }

        match (report.clock_skew, previous.clock_skew) {
            (Some(lag), None) => {
                let stamp = self.last_stamp.unwrap_or_default();
                if self.timestamp_mode == TimestampMode::Internal {
                    warn!(
                        "lidar time {} ns is {:.3} s behind host time {} ns, \
                         sensor uses {}: consider PTP_1588 time sync",
                        stamp,
                        lag.as_secs_f64(),
                        now,
                        self.timestamp_mode
                    );
                } else {
                    warn!(
                        "lidar time {} ns is {:.3} s behind host time {} ns",
                        stamp,
                        lag.as_secs_f64(),
                        now
                    );
                }
            }
            (None, Some(_)) => info!("lidar clock back in sync with host"),
            _ => {}
        }

        if report.non_monotonic && !previous.non_monotonic {
            warn!("scan timestamps went backwards");
        }

        if report.backlog && !previous.backlog {
            warn!("lidar queue backlog above {:.0}%", self.config.backlog_ratio * 100.0);
        } else if !report.backlog && previous.backlog {
            info!("lidar queue backlog cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: u64 = 100_000_000;
    const START: u64 = 1_700_000_000_000_000_000;

    fn monitor() -> StreamHealth {
        StreamHealth::new(HealthConfig::new(10.0), TimestampMode::Internal)
    }

    #[test]
    fn test_exact_period_is_healthy() {
        let mut health = monitor();
        for i in 0..100 {
            let stamp = START + i * PERIOD;
            health.tick(stamp);
            let report = health.update_at(stamp + 1_000_000);
            assert!(report.is_ok(), "scan {}: {:?}", i, report);
        }

        let report = health.last_report();
        assert_eq!(report.rate, RateStatus::Ok);
        assert!((report.observed_hz.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(health.ticks(), 100);
    }

    #[test]
    fn test_clock_skew() {
        let mut health = monitor();
        let now = START + 10_000_000_000;
        health.tick(START);

        let report = health.update_at(now);
        assert_eq!(report.clock_skew, Some(Duration::from_secs(10)));
        assert!(!report.is_ok());

        // Recovers once timestamps catch up.
        health.tick(now);
        assert_eq!(health.update_at(now + 1).clock_skew, None);
    }

    #[test]
    fn test_unknown_rate_until_two_scans() {
        let mut health = monitor();
        assert_eq!(health.update_at(START).rate, RateStatus::Unknown);
        health.tick(START);
        let report = health.update_at(START);
        assert_eq!(report.rate, RateStatus::Unknown);
        assert!(report.is_ok());
    }

    #[test]
    fn test_rate_too_low_and_gap() {
        let mut health = monitor();
        health.tick(START);
        health.tick(START + PERIOD);
        health.tick(START + 4 * PERIOD);

        let report = health.update_at(START + 4 * PERIOD);
        assert!(report.gap);
        assert_eq!(report.rate, RateStatus::TooLow);

        // Gap flag is cleared by the update.
        health.tick(START + 5 * PERIOD);
        assert!(!health.update_at(START + 5 * PERIOD).gap);
    }

    #[test]
    fn test_rate_too_high() {
        let mut health = monitor();
        for i in 0..10 {
            health.tick(START + i * PERIOD / 2);
        }
        assert_eq!(health.update_at(START + PERIOD * 5).rate, RateStatus::TooHigh);
    }

    #[test]
    fn test_non_monotonic() {
        let mut health = monitor();
        health.tick(START + PERIOD);
        health.tick(START);
        let report = health.update_at(START + PERIOD);
        assert!(report.non_monotonic);
        assert_eq!(report.observed_hz, None);
    }

    #[test]
    fn test_backlog() {
        let mut health = monitor();
        health.observe_backlog(1600, 2048);
        assert!(health.update_at(START).backlog);
        health.observe_backlog(10, 2048);
        assert!(!health.update_at(START).backlog);
        health.observe_backlog(0, 0);
        assert!(!health.update_at(START).backlog);
    }

    #[test]
    fn test_update_uses_wall_clock() {
        let mut health = monitor();
        health.tick(wall_clock().unwrap());
        let report = health.update().unwrap();
        assert_eq!(report.clock_skew, None);
    }
    #[test]
    fn test_backwards_stamp_keeps_reference() {
        let mut health = monitor();
        for i in 0..5 {
            health.tick(START + i * PERIOD);
        }
        health.tick(START + PERIOD);
        assert!(health.update_at(START + 4 * PERIOD).non_monotonic);

        health.tick(START + 5 * PERIOD);
        let report = health.update_at(START + 5 * PERIOD);
        assert!(!report.gap);
        assert!(!report.non_monotonic);
        assert_eq!(report.rate, RateStatus::Ok);
        assert!((report.observed_hz.unwrap() - 10.0).abs() < 1e-9);
    }
}
