// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_cloudpub::batcher::IncompletePolicy;
use serde_json::json;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use zenoh::config::{Config, WhatAmI};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Hostname or IP address of the sensor. Metadata is fetched from its
    /// HTTP API unless --metadata is given.
    #[arg(env)]
    pub target: Option<String>,

    /// Read sensor metadata from a JSON file instead of the sensor.
    #[arg(long, env)]
    pub metadata: Option<PathBuf>,

    /// Seconds to wait for the sensor to report RUNNING.
    #[arg(long, env, default_value = "60")]
    pub metadata_timeout: u64,

    /// Prefix for all frame names, used to tell several sensors apart.
    #[arg(long, env, default_value = "")]
    pub tf_prefix: String,

    /// lidar base topic, clouds go to TOPIC/points and imu to TOPIC/imu
    #[arg(long, env, default_value = "rt/lidar")]
    pub lidar_topic: String,

    /// Address the UDP sockets bind to.
    #[arg(long, env, default_value = "0.0.0.0")]
    pub bind: String,

    /// Lidar UDP port, defaults to the port in the sensor metadata.
    #[arg(long, env)]
    pub lidar_port: Option<u16>,

    /// IMU UDP port, defaults to the port in the sensor metadata.
    #[arg(long, env)]
    pub imu_port: Option<u16>,

    /// What to do with a scan whose revolution wrapped before all columns
    /// arrived.
    #[arg(long, env, value_enum, default_value_t = IncompletePolicy::Emit)]
    pub incomplete_scans: IncompletePolicy,

    /// Lidar packet queue capacity.
    #[arg(long, env, default_value = "2048")]
    pub lidar_queue: usize,

    /// IMU packet queue capacity.
    #[arg(long, env, default_value = "100")]
    pub imu_queue: usize,

    /// Accepted relative deviation of the scan rate.
    #[arg(long, env, default_value = "0.1")]
    pub rate_tolerance: f64,

    /// Seconds a scan timestamp may lag the host clock before clock skew
    /// is reported.
    #[arg(long, env, default_value = "5.0")]
    pub max_clock_lag: f64,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// zenoh connection mode
    #[arg(long, env, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env)]
    no_multicast_scouting: bool,
}

impl Args {
    pub fn points_topic(&self) -> String {
        format!("{}/points", self.lidar_topic)
    }

    pub fn imu_topic(&self) -> String {
        format!("{}/imu", self.lidar_topic)
    }
}

impl TryFrom<&Args> for Config {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();

        config.insert_json5("mode", &json!(args.mode).to_string())?;

        if !args.connect.is_empty() {
            config.insert_json5("connect/endpoints", &json!(args.connect).to_string())?;
        }

        if !args.listen.is_empty() {
            config.insert_json5("listen/endpoints", &json!(args.listen).to_string())?;
        }

        if args.no_multicast_scouting {
            config.insert_json5("scouting/multicast/enabled", &json!(false).to_string())?;
        }

        config.insert_json5("scouting/multicast/interface", &json!("lo").to_string())?;

        Ok(config)
    }
}
