//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "plate", version, about = "96-well plate positioner")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/plate_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::Current
        } else {
            RtLock::None
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Home both axes, then visit and photograph every well in a setpoint file
    Run {
        /// Setpoint CSV: one `x_mm, y_mm` pair per line
        #[arg(long, value_name = "FILE")]
        setpoints: PathBuf,
        /// Drive simulated axes instead of GPIO
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
        /// Enable real-time mode (SCHED_FIFO, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on Linux.\n\nAttempts SCHED_FIFO priority and mlockall so caliper edge handling keeps its timing under load. May require CAP_SYS_NICE / CAP_IPC_LOCK or root. Failures are logged as warnings and the run continues."
        )]
        rt: bool,
        /// Real-time priority for SCHED_FIFO (1..=max)
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Select memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
    },
    /// Home both axes and zero the calipers, then exit
    Calibrate {
        /// Drive simulated axes instead of GPIO
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
    },
    /// Write a serpentine setpoint file for a rectangular plate
    GenerateSetpoints {
        #[arg(long, default_value_t = 8)]
        rows: usize,
        #[arg(long, default_value_t = 12)]
        columns: usize,
        /// X position of the first well, in mm
        #[arg(long = "initial-x", default_value_t = 0.0)]
        initial_x: f64,
        /// Y position of the first well, in mm
        #[arg(long = "initial-y", default_value_t = 0.0)]
        initial_y: f64,
        /// Well pitch along X, in mm
        #[arg(long = "pitch-x", default_value_t = 9.0)]
        pitch_x: f64,
        /// Well pitch along Y, in mm
        #[arg(long = "pitch-y", default_value_t = 9.0)]
        pitch_y: f64,
        /// X backlash compensation on direction reversal, in mm
        #[arg(long, default_value_t = 2.5)]
        hysteresis: f64,
        /// Output file (prints to stdout when omitted)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Validate the config and report what hardware would be used
    SelfCheck,
}
