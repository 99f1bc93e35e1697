// vexai command line: runs the perception loop against a recorded camera session

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vexai_eye::backend::{BackendKind, BackendProbe};
use vexai_eye::pose::{FixedPose, PoseSource, SharedPose};
use vexai_eye::sinks::{ControllerSink, DashboardSink, JsonLinesSink, LogSink, SnapshotDirSink};
use vexai_eye::{OrtProbe, Pipeline, ReplayCamera, RobotPose, VexConfig};

#[derive(Parser)]
#[command(name = "vexai")]
#[command(about = "Object detection and localization for a competition robot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection loop (default)
    Run {
        /// Directory of recorded color/depth frames
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Restart the recording when it ends
        #[arg(long = "loop")]
        looping: bool,

        /// Append detection batches to this file instead of stdout
        #[arg(long)]
        records: Option<PathBuf>,

        /// Write dashboard snapshots into this directory
        #[arg(long)]
        dashboard_dir: Option<PathBuf>,

        /// Read robot poses as JSON lines from stdin
        #[arg(long)]
        pose_stdin: bool,

        /// Backend order, e.g. "gpu,quantized"
        #[arg(long, value_delimiter = ',')]
        backend: Vec<BackendKind>,
    },

    /// Report which inference backends are usable
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => VexConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => VexConfig::default(),
    };
    config.apply_env();
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    // stdout carries the JSON-lines records
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    match cli.command.unwrap_or(Commands::Run {
        replay: None,
        looping: false,
        records: None,
        dashboard_dir: None,
        pose_stdin: false,
        backend: Vec::new(),
    }) {
        Commands::Probe => probe(&config),
        Commands::Run { replay, looping, records, dashboard_dir, pose_stdin, backend } => {
            if !backend.is_empty() {
                config.backend.policy = backend;
            }
            if replay.is_some() {
                config.camera.replay_dir = replay;
                config.camera.replay_loop = looping;
            }
            if records.is_some() {
                config.publish.records_path = records;
            }
            if dashboard_dir.is_some() {
                config.dashboard.snapshot_dir = dashboard_dir;
            }
            run(config, pose_stdin).await
        }
    }
}

fn probe(config: &VexConfig) -> Result<()> {
    let probes = OrtProbe::all(&config.backend);
    let report: Vec<_> = probes
        .iter()
        .map(|probe| match probe.probe() {
            Ok(capability) => json!({
                "backend": probe.kind().to_string(),
                "available": true,
                "model": capability.model_path.display().to_string(),
            }),
            Err(reason) => json!({
                "backend": probe.kind().to_string(),
                "available": false,
                "reason": reason,
            }),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(config: VexConfig, pose_stdin: bool) -> Result<()> {
    let Some(replay_dir) = config.camera.replay_dir.clone() else {
        bail!("no camera source configured; pass --replay <dir> or set camera.replay_dir");
    };
    let camera = Arc::new(ReplayCamera::new(replay_dir, config.camera.frame_rate, config.camera.replay_loop));

    let pose: Arc<dyn PoseSource> = if pose_stdin {
        let shared = SharedPose::new(Duration::from_millis(config.pose.stale_after_ms));
        shared.spawn_json_reader(BufReader::new(tokio::io::stdin()));
        Arc::new(shared)
    } else if let Some((x, y, azimuth)) = config.pose.fixed {
        Arc::new(FixedPose::new(RobotPose::new(x, y, 0.0, azimuth)))
    } else {
        warn!("No pose source; world coordinates are relative to the robot");
        Arc::new(FixedPose::new(RobotPose::disconnected()))
    };

    let controller: Arc<dyn ControllerSink> = match &config.publish.records_path {
        Some(path) => Arc::new(JsonLinesSink::append_to(path).await?),
        None => Arc::new(JsonLinesSink::stdout()),
    };

    let dashboard: Arc<dyn DashboardSink> = match &config.dashboard.snapshot_dir {
        Some(dir) => Arc::new(SnapshotDirSink::create(dir).await?),
        None => Arc::new(LogSink),
    };

    let probes = OrtProbe::all(&config.backend);
    let probes: Vec<&dyn BackendProbe> = probes.iter().map(|p| p as &dyn BackendProbe).collect();

    let pipeline = Pipeline::builder(Arc::new(config))
        .camera(camera)
        .pose(pose)
        .controller(controller)
        .dashboard(dashboard)
        .launch(&probes)
        .await
        .context("starting pipeline")?;

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        stop.stop();
    });

    match pipeline.run().await {
        Ok(report) => {
            info!(
                "Stopped after {} frames ({} dropped, {} inference failures)",
                report.published, report.frames_dropped, report.inference_failures
            );
            Ok(())
        }
        Err(e) => {
            error!("Pipeline ended: {}", e);
            Err(e.into())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
