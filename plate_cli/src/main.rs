#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `plate`: home the axes, visit every well of a plate, photograph each one.

mod cli;
mod error_fmt;
mod rt;
mod run;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::{Result, WrapErr};
use plate_config::{Config, GridSpec};
use std::path::Path;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn main() {
    // Pretty panic and error reports; color-eyre is built without its default features.
    let _ = color_eyre::install();

    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        tracing::error!(error = %format!("{e:#}"), "exiting with error");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    // Pure file generation needs neither config nor logging.
    if let Commands::GenerateSetpoints {
        rows,
        columns,
        initial_x,
        initial_y,
        pitch_x,
        pitch_y,
        hysteresis,
        out,
    } = &cli.cmd
    {
        let spec = GridSpec {
            rows: *rows,
            columns: *columns,
            initial_offset_x_mm: *initial_x,
            initial_offset_y_mm: *initial_y,
            pitch_x_mm: *pitch_x,
            pitch_y_mm: *pitch_y,
            hysteresis_mm: *hysteresis,
        };
        return generate_setpoints(&spec, out.as_deref());
    }

    let mut cfg = load_config(&cli.config)?;
    init_tracing(&cli, &cfg)?;
    tracing::info!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Run {
            setpoints,
            sim,
            rt,
            rt_prio,
            rt_lock,
        } => {
            let args = run::RunArgs {
                setpoints: &setpoints,
                sim,
                rt,
                rt_prio,
                rt_lock,
            };
            run::run_plate(&mut cfg, &args).map(|_| ())
        }
        Commands::Calibrate { sim } => run::run_calibrate(&mut cfg, sim),
        Commands::SelfCheck => self_check(&cfg),
        Commands::GenerateSetpoints { .. } => Ok(()),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = plate_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, cfg: &Config) -> Result<()> {
    // RUST_LOG wins over --log-level
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .wrap_err_with(|| format!("invalid --log-level {:?}", cli.log_level))?;

    // Console goes to stderr so stdout stays machine-readable.
    let console = if cli.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match cfg.logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().map_or_else(
                || std::ffi::OsString::from("plate.log"),
                std::ffi::OsStr::to_os_string,
            );
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("create log dir {}", dir.display()))?;
            let appender = match cfg.logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let level = cfg.logging.level.as_deref().unwrap_or("info");
            let filter = EnvFilter::try_new(level)
                .wrap_err_with(|| format!("invalid logging.level {level:?}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")
}

fn generate_setpoints(spec: &GridSpec, out: Option<&Path>) -> Result<()> {
    if spec.rows == 0 || spec.columns == 0 {
        eyre::bail!("rows and columns must be >= 1");
    }
    let points = plate_config::generate_grid(spec);
    match out {
        Some(path) => {
            plate_config::write_setpoints_csv(path, &points)
                .wrap_err_with(|| format!("write setpoints to {}", path.display()))?;
            println!("Wrote {} setpoints to {}", points.len(), path.display());
        }
        None => {
            for p in &points {
                println!("{}, {}", p.x_mm, p.y_mm);
            }
        }
    }
    Ok(())
}

fn self_check(cfg: &Config) -> Result<()> {
    let gpio = cfg!(all(feature = "hardware", target_os = "linux"));
    let camera = format!("{:?}", cfg.camera.backend).to_ascii_lowercase();
    if JSON_MODE.get().copied().unwrap_or(false) {
        println!(
            "{}",
            serde_json::json!({
                "config": "ok",
                "gpio": gpio,
                "camera": camera,
                "estop": cfg.estop.pin.is_some(),
            })
        );
    } else {
        println!("config: ok");
        println!("gpio: {}", if gpio { "available" } else { "not built in (use --sim)" });
        println!("camera: {camera}");
        match cfg.estop.pin {
            Some(pin) => println!("estop: gpio {pin}"),
            None => println!("estop: not configured"),
        }
    }
    Ok(())
}
