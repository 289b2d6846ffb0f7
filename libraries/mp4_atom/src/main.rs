use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, level_filters::LevelFilter};

use mp4_atom::atoms::common::StereoMode;
use mp4_atom::inject::{
    inject_edts_to_moov, inject_projection_metadata_to_moov, inject_sdtp_to_moov,
    inject_spherical_v1_metadata_to_moov, replace_mett_with_camm, SphericalV1Params,
};
use mp4_atom::io::Reader;
use mp4_atom::modify_moov::modify_moov;
use mp4_atom::reader::read_atoms;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StereoModeArg {
    Mono,
    TopBottom,
    LeftRight,
}

impl From<StereoModeArg> for StereoMode {
    fn from(arg: StereoModeArg) -> StereoMode {
        match arg {
            StereoModeArg::Mono => StereoMode::Mono,
            StereoModeArg::TopBottom => StereoMode::TopBottom,
            StereoModeArg::LeftRight => StereoMode::LeftRight,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "MP4 atom tree inspector and metadata injector")]
struct Args {
    /// Set the log level (possible values: error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a file and print its atom tree.
    Dump { input: String },
    /// Inject a frame-dependency (sdtp) table derived from the key-frame list.
    InjectSdtp { input: String, output: String },
    /// Ensure every track carries an edit list ahead of its media atom.
    InjectEdts { input: String, output: String },
    /// Replace the mett sample entry of the metadata track with camm.
    ReplaceCamm { input: String, output: String },
    /// Inject Spherical V1 XML metadata into the video track.
    InjectSpherical {
        input: String,
        output: String,
        #[arg(long, default_value = "mono")]
        stereo: StereoModeArg,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        #[arg(long, default_value_t = 180.0)]
        fov_x: f64,
        #[arg(long, default_value_t = 180.0)]
        fov_y: f64,
        #[arg(long, default_value = "mp4_atom injector")]
        stitcher: String,
        /// Optional serialized sv3d atom to inject as V2 metadata.
        #[arg(long)]
        sv3d: Option<String>,
    },
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

    let result = match args.command {
        Command::Dump { input } => dump(&input),
        Command::InjectSdtp { input, output } => {
            modify_moov(&|moov| inject_sdtp_to_moov(moov), &input, &output)
        }
        Command::InjectEdts { input, output } => {
            modify_moov(&|moov| inject_edts_to_moov(moov), &input, &output)
        }
        Command::ReplaceCamm { input, output } => {
            modify_moov(&|moov| replace_mett_with_camm(moov), &input, &output)
        }
        Command::InjectSpherical {
            input,
            output,
            stereo,
            width,
            height,
            fov_x,
            fov_y,
            stitcher,
            sv3d,
        } => {
            let params = SphericalV1Params {
                stitcher,
                stereo_mode: stereo.into(),
                width,
                height,
                fov_x_degrees: fov_x,
                fov_y_degrees: fov_y,
            };
            let sv3d_bytes = sv3d.map(std::fs::read).transpose().unwrap_or_else(|e| {
                error!("failed to read sv3d file: {e}");
                std::process::exit(1);
            });
            modify_moov(
                &move |moov| {
                    inject_spherical_v1_metadata_to_moov(&params, moov)?;
                    if let Some(sv3d_bytes) = &sv3d_bytes {
                        inject_projection_metadata_to_moov(params.stereo_mode, sv3d_bytes, moov)?;
                    }
                    Ok(())
                },
                &input,
                &output,
            )
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
    info!("done");
}

fn dump(input: &str) -> mp4_atom::FormatResult<()> {
    let mut reader = Reader::open(input)?;
    let atoms = read_atoms(&mut reader);
    println!("Parsed {} top-level atoms from '{input}':\n", atoms.len());
    for (i, atom) in atoms.iter().enumerate() {
        println!("Atom {}:\n{atom:#?}\n", i + 1);
    }
    Ok(())
}
