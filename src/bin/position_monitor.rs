/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Logs position telemetry from a ublox receiver or from gpsd.
//!
//!   position_monitor --device /dev/ttyACM0
//!   position_monitor --source gpsd --gpsd 127.0.0.1:2947
//!
//! Stops on SIGINT or SIGTERM.

use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use ublox_positioning::config::{Config, SourceKind};
use ublox_positioning::{event_loop, PositionProvider, SetupError};

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn signal_handler(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Source {
    Uart,
    Gpsd,
}

#[derive(Parser, Debug)]
#[command(name = "position_monitor", about = "Log ublox/gpsd position telemetry")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Position source, overrides the configuration
    #[arg(long, value_enum)]
    source: Option<Source>,

    /// Serial device node of the receiver
    #[arg(long)]
    device: Option<PathBuf>,

    /// gpsd address as host:port
    #[arg(long)]
    gpsd: Option<String>,

    /// Named pipe used by the gpsd bridge
    #[arg(long)]
    pipe: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<Config, SetupError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(source) = cli.source {
        config.source = match source {
            Source::Uart => SourceKind::Uart,
            Source::Gpsd => SourceKind::Gpsd,
        };
    }
    if let Some(device) = &cli.device {
        config.uart.device = device.clone();
    }
    if let Some(address) = &cli.gpsd {
        config.gpsd.address = address.clone();
    }
    if let Some(pipe) = &cli.pipe {
        config.gpsd.pipe = pipe.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_provider(config: &Config) -> Result<Box<dyn PositionProvider>, SetupError> {
    let mut provider: Box<dyn PositionProvider> = match config.source {
        SourceKind::Uart => {
            info!("using receiver on {}", config.uart.device.display());
            let mut ubx =
                ublox_positioning::open_uart_provider(&config.uart.device, config.uart.timing())?;
            ubx.on_error(|e| warn!("{}", e));
            Box::new(ubx)
        }
        SourceKind::Gpsd => {
            info!(
                "using gpsd at {} via {}",
                config.gpsd.address,
                config.gpsd.pipe.display()
            );
            Box::new(ublox_positioning::open_gpsd_provider(&config.gpsd)?)
        }
    };

    let model = provider.telemetry_mut();
    model.on_telemetry(|t| {
        info!(
            "{} {} lat {:.7} lon {:.7} speed {:.3} m/s",
            t.date_string(),
            t.time_string(),
            t.latitude,
            t.longitude,
            t.velocity
        )
    });
    model.on_satellites_changed(|n| info!("satellites in use: {}", n));
    model.on_fix_mode_changed(|mode| info!("fix mode: {:?}", mode));
    Ok(provider)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("position_monitor: {}", e);
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    unsafe {
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
    }

    let mut provider = match build_provider(&config) {
        Ok(provider) => provider,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = event_loop::run(provider.as_mut(), &RUNNING) {
        error!("event loop failed: {}", e);
        return ExitCode::FAILURE;
    }
    info!("stopped");
    ExitCode::SUCCESS
}
