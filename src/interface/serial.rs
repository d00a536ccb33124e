use embedded_hal as hal;
use super::{DeviceInterface, SerialControl};
use crate::Error;
use nb::block;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;

/// Upper bound on bytes pulled in by a single `fill`,
/// so a chattering receiver can't starve the event loop.
const MAX_FILL: usize = 4096;

/// This encapsulates the Serial UART peripheral
/// and the receive buffer that `fill` drains it into.
pub struct SerialInterface<SER> {
    /// the serial port to use when communicating
    serial: SER,
    rx: VecDeque<u8>,
}

impl<SER, CommE> SerialInterface<SER>
    where
        SER: hal::serial::Read<u8, Error = CommE>
        + hal::serial::Write<u8, Error = CommE>
        + SerialControl<Error = CommE>,
{
    pub fn new(serial_port: SER) -> Self {
        Self {
            serial: serial_port,
            rx: VecDeque::new(),
        }
    }

    /// Give back the serial port
    pub fn release(self) -> SER {
        self.serial
    }
}

impl<SER, CommE> DeviceInterface for SerialInterface<SER>
    where
        SER: hal::serial::Read<u8, Error = CommE>
        + hal::serial::Write<u8, Error = CommE>
        + SerialControl<Error = CommE>,
        CommE: core::fmt::Debug,
{
    type InterfaceError = Error<CommE>;

    fn fill(&mut self) -> Result<usize, Self::InterfaceError> {
        let mut fetched = 0;
        while fetched < MAX_FILL {
            match self.serial.read() {
                Ok(byte) => {
                    self.rx.push_back(byte);
                    fetched += 1;
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(Error::Comm(e)),
            }
        }
        Ok(self.rx.len())
    }

    fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn read_many(&mut self, buffer: &mut [u8]) -> usize {
        let count = buffer.len().min(self.rx.len());
        for (word, byte) in buffer.iter_mut().zip(self.rx.drain(..count)) {
            *word = byte;
        }
        count
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::InterfaceError> {
        for word in bytes {
            block!(self.serial.write(*word)).map_err(Error::Comm)?;
        }
        block!(self.serial.flush()).map_err(Error::Comm)?;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::InterfaceError> {
        self.serial.set_baud_rate(baud).map_err(Error::Comm)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.serial.raw_fd()
    }
}
