pub mod serial;
pub use self::serial::SerialInterface;

pub mod tty;
pub use self::tty::TtyPort;

#[cfg(test)]
pub(crate) mod mock;

use std::os::unix::io::RawFd;

/// A method of communicating with the device
pub trait DeviceInterface {
    /// Interface associated error type
    type InterfaceError: core::fmt::Debug;

    /// Fill up our buffer with whatever bytes the device has sent.
    /// This function should be called before attempting to read.
    /// Returns the number of available bytes.
    fn fill(&mut self) -> Result<usize, Self::InterfaceError>;

    /// Read a single buffered byte, if any.
    /// Call `fill` before calling this.
    fn read(&mut self) -> Option<u8>;

    /// Read multiple buffered bytes.
    /// Call `fill` before calling this.
    fn read_many(&mut self, buffer: &mut [u8]) -> usize;

    /// Send all of `bytes` to the device
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::InterfaceError>;

    /// Change the local line speed
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::InterfaceError>;

    /// Descriptor that becomes readable when the device has data
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Line control that the embedded-hal serial traits don't cover
pub trait SerialControl {
    type Error;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error>;

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}
