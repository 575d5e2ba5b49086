//! Command-line interface for doorbell
//!
//! Provides argument parsing using clap derive macros.

use crate::config::Config;
use crate::stream::config::VideoSource;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Smart video doorbell streaming service
#[derive(Parser, Debug)]
#[command(
    name = "doorbell",
    version,
    about = "Smart video doorbell: camera to RTSP streaming service"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Camera source (test, v4l2, libcamera); overrides video.source
    #[arg(long, global = true, value_name = "SOURCE", value_parser = parse_camera)]
    pub camera: Option<VideoSource>,

    /// Use the V4L2 hardware H.264 encoder; overrides video.hardware_encoding
    #[arg(long, global = true)]
    pub hardware_encoding: bool,

    /// Also write logs (without colors) to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Supervisory loop interval (default: 1s). Examples: 500ms, 2s
    #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
    pub poll_interval: Option<Duration>,
}

fn parse_camera(s: &str) -> Result<VideoSource, String> {
    s.parse::<VideoSource>().map_err(|e| e.to_string())
}

/// Parse a duration; bare numbers are seconds.
///
/// Supports any duration format accepted by `humantime`.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the doorbell service in the foreground until SIGINT/SIGTERM
    Run,

    /// Print the streaming pipeline built from the configuration
    Pipeline,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Dump a configuration template with default values
    Dump,
    /// Show the effective configuration (file, environment and flags applied)
    Show,
}

impl Cli {
    /// The subcommand to run; `run` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }

    /// Applies command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(camera) = self.camera {
            config.video.source = camera;
        }
        if self.hardware_encoding {
            config.video.hardware_encoding = true;
        }
    }
}
