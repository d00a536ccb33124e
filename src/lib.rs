/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Positioning for a ublox M8 receiver.
//!
//! Two sources feed the same telemetry model:
//! - a UART link to the receiver, brought up with baud rate detection and
//!   configured over UBX (`UbxPositionProvider`)
//! - a gpsd bridge that relays fixes from a worker thread through a named
//!   pipe (`GpsdPositionProvider`)

use embedded_hal as hal;

pub mod codec;
pub mod config;
pub mod device;
pub mod event_loop;
pub mod gpsd;
mod interface;
pub mod messages;
pub mod orchestrator;
pub mod signal;
pub mod telemetry;
pub mod timer;

pub use interface::{DeviceInterface, SerialControl, SerialInterface, TtyPort};
pub use device::{DeviceEvent, LinkPhase, LinkTiming, UartDevice};
pub use gpsd::GpsdPositionProvider;
pub use orchestrator::{ConfigurationError, UbxPositionProvider};
pub use telemetry::{
    FixMode, PositionProvider, PositionSample, PositionTelemetry, StaticPositionProvider,
    TelemetryModel,
};

use log::error;
use std::path::{Path, PathBuf};

/// Errors in this crate
#[derive(Debug, thiserror::Error)]
pub enum Error<CommE: core::fmt::Debug> {
    /// Sensor communication error
    #[error("communication error: {0:?}")]
    Comm(CommE),
}

/// Failures that leave a position source unusable
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("cannot open serial device {path}: {source}")]
    Open {
        path: PathBuf,
        source: serialport::Error,
    },

    #[error("cannot lock serial device {path}: {source}")]
    Lock {
        path: PathBuf,
        source: serialport::Error,
    },

    #[error("cannot create pipe {path}: {source}")]
    Pipe {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot start gpsd worker: {0}")]
    Spawn(std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Receiver configuration steps, as reported in errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPhase {
    MessageRatePoll,
    MessageRateEnable,
    MeasurementRatePoll,
    MeasurementRateEnable,
}

impl core::fmt::Display for ConfigPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            ConfigPhase::MessageRatePoll => "message rate poll",
            ConfigPhase::MessageRateEnable => "message rate enable",
            ConfigPhase::MeasurementRatePoll => "measurement rate poll",
            ConfigPhase::MeasurementRateEnable => "measurement rate enable",
        };
        f.write_str(text)
    }
}

/// Receiver driver over any embedded-hal serial port with line control
pub fn new_serial_driver<UART, CommE>(
    uart: UART,
    timing: LinkTiming,
) -> UbxPositionProvider<SerialInterface<UART>>
where
    UART: hal::serial::Read<u8, Error = CommE>
        + hal::serial::Write<u8, Error = CommE>
        + SerialControl<Error = CommE>,
    CommE: core::fmt::Debug,
{
    let iface = interface::SerialInterface::new(uart);
    UbxPositionProvider::new(UartDevice::new(iface, timing))
}

/// Open and lock a tty and drive the receiver behind it
pub fn open_uart_provider(
    path: &Path,
    timing: LinkTiming,
) -> Result<UbxPositionProvider<SerialInterface<TtyPort>>, SetupError> {
    let port = TtyPort::open(path)?;
    Ok(new_serial_driver(port, timing))
}

/// Create the named pipe and start relaying fixes from gpsd
pub fn open_gpsd_provider(
    config: &config::GpsdConfig,
) -> Result<GpsdPositionProvider, SetupError> {
    GpsdPositionProvider::new(config).map_err(|e| {
        error!("gpsd position source unavailable: {}", e);
        e
    })
}
