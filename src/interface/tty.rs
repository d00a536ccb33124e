use embedded_hal as hal;
use super::SerialControl;
use crate::SetupError;
use log::{error, info};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

/// Line speed a factory-fresh M8 receiver starts at
pub const DEFAULT_BAUD: u32 = 9600;

/// A tty device node, locked for exclusive use while this object lives.
/// Reads never block: an empty line reports `WouldBlock`.
pub struct TtyPort {
    port: serialport::TTYPort,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl TtyPort {
    /// Open and lock the device node at 9600 8N1
    pub fn open(path: &Path) -> Result<Self, SetupError> {
        let path_str = path.to_string_lossy().into_owned();
        let mut port = serialport::new(path_str.as_str(), DEFAULT_BAUD)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_micros(100))
            .open_native()
            .map_err(|source| {
                error!("cannot open {}: {}", path_str, source);
                SetupError::Open {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        // a second driver on the same receiver would corrupt the handshake
        port.set_exclusive(true).map_err(|source| {
            error!("cannot lock {}: {}", path_str, source);
            SetupError::Lock {
                path: path.to_path_buf(),
                source,
            }
        })?;

        info!("opened {} at {} baud", path_str, DEFAULT_BAUD);
        Ok(Self {
            port,
            rx: VecDeque::new(),
            tx: Vec::new(),
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 256];
        match self.port.read(&mut chunk) {
            Ok(n) => {
                self.rx.extend(&chunk[..n]);
                Ok(())
            }
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl hal::serial::Read<u8> for TtyPort {
    type Error = io::Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if self.rx.is_empty() {
            self.refill().map_err(nb::Error::Other)?;
        }
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl hal::serial::Write<u8> for TtyPort {
    type Error = io::Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if !self.tx.is_empty() {
            let pending = std::mem::take(&mut self.tx);
            self.port.write_all(&pending).map_err(nb::Error::Other)?;
        }
        self.port.flush().map_err(nb::Error::Other)
    }
}

impl SerialControl for TtyPort {
    type Error = io::Error;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        SerialPort::set_baud_rate(&mut self.port, baud).map_err(io::Error::from)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.port.as_raw_fd())
    }
}
