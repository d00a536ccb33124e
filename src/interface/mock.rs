//! Scripted serial peripheral for unit tests

use super::SerialControl;
use embedded_hal as hal;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, PartialEq)]
pub struct MockError;

#[derive(Default)]
struct State {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    pending_tx: Vec<u8>,
    bauds: Vec<u32>,
    fail_next_read: bool,
}

pub struct MockSerial {
    state: Rc<RefCell<State>>,
}

/// Test-side view of a `MockSerial` that has been moved into a driver
#[derive(Clone)]
pub struct MockHandle {
    state: Rc<RefCell<State>>,
}

impl MockSerial {
    pub fn new() -> (Self, MockHandle) {
        let state = Rc::new(RefCell::new(State::default()));
        (
            Self {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Queue bytes as if the receiver had sent them
    pub fn inject(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Everything flushed to the line so far
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().tx.clone()
    }

    pub fn clear_written(&self) {
        self.state.borrow_mut().tx.clear();
    }

    pub fn baud_history(&self) -> Vec<u32> {
        self.state.borrow().bauds.clone()
    }

    pub fn fail_next_read(&self) {
        self.state.borrow_mut().fail_next_read = true;
    }
}

impl hal::serial::Read<u8> for MockSerial {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(nb::Error::Other(MockError));
        }
        state.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl hal::serial::Write<u8> for MockSerial {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.state.borrow_mut().pending_tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        let pending = std::mem::take(&mut state.pending_tx);
        state.tx.extend(pending);
        Ok(())
    }
}

impl SerialControl for MockSerial {
    type Error = MockError;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        self.state.borrow_mut().bauds.push(baud);
        Ok(())
    }
}
