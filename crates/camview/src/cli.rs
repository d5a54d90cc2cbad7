use std::path::PathBuf;

use camconfig::CameraSetting;
use camrender::{BufferSize, Rotation};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "camview",
    author,
    version,
    about = "Camera preview pipeline driver",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a scripted preview session against simulated camera hardware.
    Run(RunArgs),
    /// Pick the capture size a camera would use for a requested size.
    Negotiate(NegotiateArgs),
    /// Print the resolved configuration directory and file.
    Where,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline configuration file; defaults to `camview.toml` in the config directory.
    #[arg(long, value_name = "FILE", env = "CAMVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the requested capture size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<BufferSize>,

    /// Lens to open: `front` or `back`.
    #[arg(long, value_name = "LENS", value_parser = parse_camera)]
    pub camera: Option<CameraSetting>,

    /// Software capture rate (0 keeps the repeating request).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// Output sizes the simulated camera advertises.
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_delimiter = ',',
        value_parser = parse_size
    )]
    pub sizes: Vec<BufferSize>,

    /// Number of frames to deliver before releasing the pipeline.
    #[arg(long, value_name = "COUNT", default_value_t = 30)]
    pub frames: u32,

    /// Switch lenses after this many frames.
    #[arg(long, value_name = "COUNT")]
    pub switch_after: Option<u32>,

    /// Size of the display window.
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_parser = parse_size,
        default_value = "720x1280"
    )]
    pub display: BufferSize,

    /// Display rotation in degrees (0, 90, 180 or 270).
    #[arg(long, value_name = "DEGREES", value_parser = parse_rotation, default_value = "0")]
    pub rotation: Rotation,

    /// Delay between delivered frames.
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 33)]
    pub frame_interval_ms: u64,

    /// Simulate the user refusing camera access.
    #[arg(long)]
    pub deny_permission: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct NegotiateArgs {
    /// Requested capture size.
    #[arg(value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub requested: BufferSize,

    /// Sizes the camera advertises, comma separated.
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_delimiter = ',',
        value_parser = parse_size,
        required = true
    )]
    pub sizes: Vec<BufferSize>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<BufferSize, String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WxH format, e.g. 1280x720".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in size '{trimmed}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in size '{trimmed}'"))?;

    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".to_string());
    }

    Ok(BufferSize::new(width, height))
}

pub fn parse_camera(value: &str) -> Result<CameraSetting, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "front" | "user" => Ok(CameraSetting::Front),
        "back" | "rear" | "environment" => Ok(CameraSetting::Back),
        other => Err(format!("unknown camera '{other}'; expected front or back")),
    }
}

pub fn parse_rotation(value: &str) -> Result<Rotation, String> {
    let degrees: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid rotation '{value}'"))?;
    Rotation::from_degrees(degrees)
        .ok_or_else(|| format!("unsupported rotation {degrees}; expected 0, 90, 180 or 270"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1280x720"), Ok(BufferSize::new(1280, 720)));
        assert_eq!(parse_size(" 640 X 480 "), Ok(BufferSize::new(640, 480)));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn parses_camera_aliases() {
        assert_eq!(parse_camera("Front"), Ok(CameraSetting::Front));
        assert_eq!(parse_camera("rear"), Ok(CameraSetting::Back));
        assert!(parse_camera("side").is_err());
    }

    #[test]
    fn parses_rotations() {
        assert_eq!(parse_rotation("270"), Ok(Rotation::Deg270));
        assert_eq!(parse_rotation("360"), Ok(Rotation::Deg0));
        assert!(parse_rotation("45").is_err());
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["camview", "run"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.frames, 30);
        assert_eq!(args.display, BufferSize::new(720, 1280));
        assert_eq!(args.rotation, Rotation::Deg0);
        assert!(args.sizes.is_empty());
    }
}
