// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_cloudpub::{
    frames::{FrameNames, static_transforms},
    health::HealthConfig,
    lidar::wall_clock,
    messages::{
        IMU_SCHEMA, POINT_CLOUD2_SCHEMA, TRANSFORM_STAMPED_SCHEMA, cloud_to_msg, encode,
        imu_to_msg, time_from_nanos, transform_to_msg,
    },
    ouster::{SensorMetadata, fetch_metadata},
    packet_source::{UdpSource, forward_packets},
    pipeline::{ImuPipeline, LidarPipeline},
};
use kanal::AsyncReceiver;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _};
use zenoh::{
    pubsub::Publisher,
    qos::{CongestionControl, Priority},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest datagram accepted on the sensor ports.
const MAX_PACKET_SIZE: usize = 65536;

/// Lidar packets between two statistics reports.
const STATS_INTERVAL: u64 = 6400;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(args.rust_log))
        .init();

    let metadata = match load_metadata(&args).await {
        Ok(metadata) => metadata,
        Err(err) => {
            error!("failed to load sensor metadata: {}", err);
            return Err(err);
        }
    };
    let format = metadata.packet_format()?;
    info!(
        "sensor {} {} firmware {}: mode {} profile {} timestamp {}",
        metadata.sensor_info.prod_line,
        metadata.sensor_info.prod_sn,
        metadata.sensor_info.build_rev,
        metadata.lidar_mode,
        format.profile(),
        metadata.timestamp_mode
    );

    let frames = FrameNames::new(&args.tf_prefix);
    let health = HealthConfig {
        expected_hz: metadata.expected_frequency() as f64,
        tolerance: args.rate_tolerance,
        max_clock_lag: Duration::try_from_secs_f64(args.max_clock_lag)?,
        ..Default::default()
    };
    let lidar = LidarPipeline::new(&metadata, args.incomplete_scans, health)?;

    let session = zenoh::open(zenoh::Config::try_from(&args)?).await?;
    debug!("opened zenoh session");

    publish_tf_static(&session, &metadata, &frames).await?;

    let points_publisher = session
        .declare_publisher(args.points_topic())
        .priority(Priority::DataHigh)
        .congestion_control(CongestionControl::Drop)
        .await?;
    let imu_publisher = session
        .declare_publisher(args.imu_topic())
        .priority(Priority::DataHigh)
        .congestion_control(CongestionControl::Drop)
        .await?;

    let lidar_port = args.lidar_port.unwrap_or(metadata.udp_port_lidar);
    let imu_port = args.imu_port.unwrap_or(metadata.udp_port_imu);
    let lidar_source = UdpSource::bind(&format!("{}:{}", args.bind, lidar_port)).await?;
    let imu_source = UdpSource::bind(&format!("{}:{}", args.bind, imu_port)).await?;
    info!("listening for lidar on {} and imu on {}", lidar_port, imu_port);

    let (lidar_tx, lidar_rx) = kanal::bounded_async(args.lidar_queue);
    let (imu_tx, imu_rx) = kanal::bounded_async(args.imu_queue);
    tokio::spawn(forward_packets(lidar_source, lidar_tx, MAX_PACKET_SIZE, "lidar"));
    tokio::spawn(forward_packets(imu_source, imu_tx, MAX_PACKET_SIZE, "imu"));

    tokio::select! {
        _ = lidar_loop(lidar, lidar_rx, &points_publisher, &frames.sensor, args.lidar_queue) => {
            error!("lidar queue closed");
        }
        _ = imu_loop(imu_rx, &imu_publisher, &frames.imu) => {
            error!("imu queue closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}

async fn load_metadata(args: &Args) -> Result<SensorMetadata, BoxError> {
    if let Some(path) = &args.metadata {
        info!("reading sensor metadata from {}", path.display());
        return Ok(SensorMetadata::from_file(path)?);
    }

    let Some(target) = args.target.clone() else {
        return Err("a sensor target or --metadata file is required".into());
    };

    info!("fetching sensor metadata from {}", target);
    let timeout = Duration::from_secs(args.metadata_timeout);
    let metadata = tokio::task::spawn_blocking(move || fetch_metadata(&target, timeout)).await??;
    Ok(metadata)
}

/// Announce the sensor → imu and sensor → lidar transforms.
async fn publish_tf_static(
    session: &zenoh::Session,
    metadata: &SensorMetadata,
    frames: &FrameNames,
) -> Result<(), BoxError> {
    let publisher = session
        .declare_publisher("rt/tf_static")
        .priority(Priority::Background)
        .congestion_control(CongestionControl::Block)
        .await?;

    let now = wall_clock()?;
    for transform in static_transforms(metadata, frames) {
        let msg = transform_to_msg(&transform, time_from_nanos(now));
        let (payload, encoding) = encode(&msg, TRANSFORM_STAMPED_SCHEMA)?;
        publisher.put(payload).encoding(encoding).await?;
        debug!("published {} -> {}", transform.parent, transform.child);
    }

    Ok(())
}

#[instrument(skip_all)]
async fn lidar_loop(
    mut pipeline: LidarPipeline,
    rx: AsyncReceiver<Vec<u8>>,
    publisher: &Publisher<'_>,
    frame_id: &str,
    capacity: usize,
) {
    let mut data = Vec::new();

    while let Ok(packet) = rx.recv().await {
        pipeline.observe_backlog(rx.len(), capacity);

        if let Some(cloud) = pipeline.process(&packet) {
            let msg = cloud_to_msg(cloud, frame_id, std::mem::take(&mut data));
            match encode(&msg, POINT_CLOUD2_SCHEMA) {
                Ok((payload, encoding)) => {
                    if let Err(err) = publisher.put(payload).encoding(encoding).await {
                        error!("point cloud publish error: {:?}", err);
                    }
                }
                Err(err) => error!("could not encode point cloud: {:?}", err),
            }
            data = msg.data;
        }

        let stats = pipeline.stats();
        if stats.report_due(STATS_INTERVAL) {
            debug!(
                "lidar stats: {:?} batcher: {:?}",
                stats,
                pipeline.batcher_stats()
            );
        }
    }
}

#[instrument(skip_all)]
async fn imu_loop(rx: AsyncReceiver<Vec<u8>>, publisher: &Publisher<'_>, frame_id: &str) {
    let mut pipeline = ImuPipeline::new();

    while let Ok(packet) = rx.recv().await {
        let Some(sample) = pipeline.process(&packet) else {
            continue;
        };

        match encode(&imu_to_msg(&sample, frame_id), IMU_SCHEMA) {
            Ok((payload, encoding)) => {
                if let Err(err) = publisher.put(payload).encoding(encoding).await {
                    error!("imu publish error: {:?}", err);
                }
            }
            Err(err) => error!("could not encode imu sample: {:?}", err),
        }
    }
}
