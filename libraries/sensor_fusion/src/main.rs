//! Replays a JSONL sensor log through the fusion filter and emits
//! orientation samples, one JSON object per gyro event.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use clap::{Parser, ValueEnum};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{error, info, level_filters::LevelFilter, warn};

use sensor_fusion::online::{FusionOptions, OnlineSensorFusion};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "IMU orientation replay")]
struct Args {
    /// JSONL sensor log with one event per line:
    /// {"sensor":"accel","t":1.0,"x":0.0,"y":0.0,"z":-9.81}
    input: String,
    /// Output JSONL path; stdout when omitted.
    #[arg(short, long)]
    output: Option<String>,
    /// Optional JSON file holding FusionOptions overrides.
    #[arg(long)]
    options: Option<String>,
    /// Recenter the filter before the first emitted sample.
    #[arg(long)]
    recenter_at_start: bool,
    /// Set the log level (possible values: error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Debug, Deserialize)]
struct SensorEvent {
    sensor: String,
    t: f64,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Serialize)]
struct OrientationSample {
    t: f64,
    orientation: [f32; 3],
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match args.log_level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        })
        .init();

    let options = match &args.options {
        Some(path) => match File::open(path).map_err(|e| e.to_string()).and_then(|f| {
            serde_json::from_reader::<_, FusionOptions>(f).map_err(|e| e.to_string())
        }) {
            Ok(options) => options,
            Err(e) => {
                error!("failed to load fusion options from {path}: {e}");
                std::process::exit(1);
            }
        },
        None => FusionOptions::default(),
    };

    let input = match File::open(&args.input) {
        Ok(file) => BufReader::new(file),
        Err(e) => {
            error!("failed to open {}: {e}", args.input);
            std::process::exit(1);
        }
    };

    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(e) => {
                error!("failed to create {path}: {e}");
                std::process::exit(1);
            }
        },
        None => Box::new(std::io::stdout().lock()),
    };

    let mut filter = OnlineSensorFusion::new(options);
    let mut recentered = !args.recenter_at_start;
    let mut num_events = 0u64;
    let mut num_samples = 0u64;

    for (line_number, line) in input.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("read error at line {}: {e}", line_number + 1);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: SensorEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("skipping malformed event at line {}: {e}", line_number + 1);
                continue;
            }
        };
        num_events += 1;

        let sample = Vector3::new(event.x, event.y, event.z);
        match event.sensor.as_str() {
            "accel" => filter.add_accel_measurement(&sample, event.t),
            "gyro" => {
                filter.add_gyro_measurement(&sample, event.t);
                if !recentered {
                    filter.recenter();
                    recentered = true;
                }
                let orientation = filter.orientation();
                let sample = OrientationSample {
                    t: event.t,
                    orientation: [orientation[0], orientation[1], orientation[2]],
                };
                match serde_json::to_string(&sample) {
                    Ok(json) => {
                        if let Err(e) = writeln!(output, "{json}") {
                            error!("write error: {e}");
                            std::process::exit(1);
                        }
                        num_samples += 1;
                    }
                    Err(e) => warn!("failed to serialize sample: {e}"),
                }
            }
            other => warn!("unknown sensor type '{other}' at line {}", line_number + 1),
        }
    }

    info!(num_events, num_samples, "replay finished");
}
