use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam::channel;
use log::{info, warn};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use stereo_vio::math::{rotation_error, translation_error};
use stereo_vio::simulation::{relative_pose, simulate_correspondences, ConstantMotionImu};
use stereo_vio::{
    optimize_pose_gauss_newton, optimize_pose_levenberg_marquardt, ImuBuffer, NavState,
    PoseEstimate, PreintegrationStatus, Preintegrator, StereoCamera, VioConfig,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Solver {
    Gn,
    Lm,
}

#[derive(Parser, Debug)]
#[command(name = "stereo_vio_sim")]
#[command(
    about = "Simulated stereo VIO: IMU preintegration + reprojection pose refinement",
    long_about = None
)]
struct Args {
    /// JSON configuration file (defaults are used for missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of camera frames to simulate
    #[arg(long, default_value_t = 20)]
    frames: usize,

    /// Camera frame rate (Hz)
    #[arg(long, default_value_t = 10.0)]
    frame_rate: f64,

    /// IMU sample rate (Hz)
    #[arg(long, default_value_t = 200.0)]
    imu_rate: f64,

    /// Random seed for landmarks and noise
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Pixel noise standard deviation
    #[arg(long, default_value_t = 1.0)]
    pixel_noise: f64,

    /// Pose solver
    #[arg(long, value_enum, default_value_t = Solver::Lm)]
    solver: Solver,

    /// Write the JSON summary here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Constant forward velocity with a constant yaw rate about gravity
struct Trajectory {
    velocity: Vector3<f64>,
    yaw_rate: f64,
}

impl Trajectory {
    fn gyro(&self) -> Vector3<f64> {
        Vector3::new(0.0, self.yaw_rate, 0.0)
    }

    /// Camera-to-world pose at time `t`
    fn pose(&self, t: f64) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.velocity * t),
            UnitQuaternion::from_scaled_axis(self.gyro() * t),
        )
    }

    fn state(&self, t: f64) -> NavState {
        let pose = self.pose(t);
        NavState::new(pose.rotation, pose.translation.vector, self.velocity)
    }
}

#[derive(Serialize)]
struct FrameReport {
    frame: usize,
    timestamp: f64,
    preintegration: PreintegrationStatus,
    imu_samples: usize,
    landmarks: usize,
    iterations: Option<usize>,
    error: Option<f64>,
    converged: Option<bool>,
    translation_error_m: Option<f64>,
    rotation_error_deg: Option<f64>,
    failure: Option<String>,
}

#[derive(Serialize)]
struct Summary {
    solver: String,
    frames: Vec<FrameReport>,
    dropped_imu_samples: u64,
    mean_translation_error_m: f64,
    mean_rotation_error_deg: f64,
}

/// Landmarks scattered in front of the whole trajectory
fn make_landmarks(rng: &mut ChaCha8Rng, count: usize) -> Vec<Vector3<f64>> {
    (0..count)
        .map(|_| {
            Vector3::new(
                rng.gen_range(-3.0..5.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(4.0..12.0),
            )
        })
        .collect()
}

/// Landmarks in front of both cameras and inside both images
fn visible_landmarks(
    landmarks: &[Vector3<f64>],
    camera: &StereoCamera,
    poses: [&Isometry3<f64>; 2],
) -> Vec<Vector3<f64>> {
    landmarks
        .iter()
        .filter(|p_w| {
            poses.iter().all(|t_x_w| {
                let p = t_x_w.inverse_transform_point(&Point3::from(**p_w)).coords;
                p.z > 0.5 && camera.left().in_image(&camera.left().project(&p))
            })
        })
        .copied()
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => VioConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VioConfig::default(),
    };
    if args.frames == 0 {
        bail!("--frames must be at least 1");
    }
    if !(args.frame_rate > 0.0) || !(args.imu_rate >= args.frame_rate) {
        bail!("IMU rate must be at least the (positive) frame rate");
    }

    let camera = config.camera.build()?;
    let gravity = config.imu.gravity();
    let buffer = Arc::new(ImuBuffer::new(config.imu.max_queue_size)?);
    let mut preintegrator = Preintegrator::with_buffer(config.imu.clone(), Arc::clone(&buffer))?;

    let trajectory = Trajectory {
        velocity: Vector3::new(0.5, 0.0, 0.2),
        yaw_rate: 0.1,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let landmarks = make_landmarks(&mut rng, 200);

    info!(
        "Simulating {} frames at {} Hz, IMU at {} Hz, solver {:?}",
        args.frames, args.frame_rate, args.imu_rate, args.solver
    );

    let frame_period = 1.0 / args.frame_rate;
    let imu = ConstantMotionImu::new(trajectory.gyro(), -gravity, 0.0, args.imu_rate)?
        .with_noise(
            config.imu.gyro_noise_sigma,
            config.imu.accel_noise_sigma,
            args.seed,
        )?;

    // Sensor thread: fill the shared buffer, then announce each frame
    let (frame_tx, frame_rx) = channel::bounded::<(usize, f64)>(1);
    let producer_buffer = Arc::clone(&buffer);
    let frames = args.frames;
    let sensor = thread::spawn(move || {
        let mut samples = imu.peekable();
        for frame in 0..=frames {
            let frame_time = frame as f64 * frame_period;
            while let Some(sample) = samples.next_if(|s| s.timestamp <= frame_time) {
                producer_buffer.push(sample);
            }
            if frame_tx.send((frame, frame_time)).is_err() {
                break;
            }
        }
    });

    let mut reports = Vec::with_capacity(args.frames);
    let mut previous_time = None;

    for (frame, timestamp) in frame_rx.iter() {
        let Some(from_time) = previous_time.replace(timestamp) else {
            // First frame only anchors the window
            continue;
        };

        let preintegration = preintegrator.preintegrate(from_time, timestamp);
        let t_0_w = trajectory.pose(from_time);
        let t_1_w = trajectory.pose(timestamp);
        let truth = relative_pose(&t_0_w, &t_1_w);

        let mut report = FrameReport {
            frame,
            timestamp,
            preintegration: preintegration.status,
            imu_samples: preintegration.num_samples,
            landmarks: 0,
            iterations: None,
            error: None,
            converged: None,
            translation_error_m: None,
            rotation_error_deg: None,
            failure: None,
        };

        // Initial guess from the inertial prediction, identity without it
        let initial = if preintegration.valid {
            let predicted = preintegration.predict(&trajectory.state(from_time));
            let t_1_w_predicted = Isometry3::from_parts(
                Translation3::from(predicted.position),
                predicted.rotation,
            );
            relative_pose(&t_0_w, &t_1_w_predicted)
        } else {
            warn!("Frame {}: preintegration failed ({:?})", frame, preintegration.status);
            Isometry3::identity()
        };

        let visible = visible_landmarks(&landmarks, &camera, [&t_0_w, &t_1_w]);
        report.landmarks = visible.len();
        let sigma = args.pixel_noise.max(0.1);
        let correspondences = simulate_correspondences(
            &t_0_w,
            &t_1_w,
            &visible,
            camera.left(),
            sigma,
            args.pixel_noise,
            &mut rng,
        )?;

        let solve = match args.solver {
            Solver::Gn => optimize_pose_gauss_newton,
            Solver::Lm => optimize_pose_levenberg_marquardt,
        };
        let estimate: stereo_vio::Result<PoseEstimate> =
            solve(&correspondences, &camera, &initial, &config.optimizer);

        match estimate {
            Ok(estimate) => {
                let t_err = translation_error(&estimate.pose, &truth);
                let r_err = rotation_error(&estimate.pose, &truth).to_degrees();
                info!(
                    "Frame {}: {} landmarks, {} iters, error {:.3}, t_err {:.4} m, r_err {:.3} deg",
                    frame,
                    visible.len(),
                    estimate.iterations,
                    estimate.error,
                    t_err,
                    r_err
                );
                report.iterations = Some(estimate.iterations);
                report.error = Some(estimate.error);
                report.converged = Some(estimate.converged);
                report.translation_error_m = Some(t_err);
                report.rotation_error_deg = Some(r_err);
            }
            Err(e) => {
                warn!("Frame {}: pose optimization failed: {}", frame, e);
                report.failure = Some(e.to_string());
            }
        }

        reports.push(report);
    }

    if sensor.join().is_err() {
        bail!("sensor thread panicked");
    }

    let solved = reports.iter().filter(|r| r.failure.is_none()).count();
    let summary = Summary {
        solver: format!("{:?}", args.solver),
        mean_translation_error_m: mean(reports.iter().filter_map(|r| r.translation_error_m)),
        mean_rotation_error_deg: mean(reports.iter().filter_map(|r| r.rotation_error_deg)),
        dropped_imu_samples: buffer.dropped(),
        frames: reports,
    };

    info!(
        "Done: {}/{} frames solved, mean t_err {:.4} m, mean r_err {:.3} deg",
        solved,
        summary.frames.len(),
        summary.mean_translation_error_m,
        summary.mean_rotation_error_deg
    );

    let json = serde_json::to_string_pretty(&summary)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Summary written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
