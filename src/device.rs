/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! UART link bring-up for a UBX receiver.
//!
//! The receiver's line speed is unknown at startup. The device probes
//! 9600 baud and then 115200 baud with a CFG-PRT poll; the first rate that
//! gets the poll acknowledged is confirmed, the port is reprogrammed to
//! UBX-only at 115200, and the link is ready once that reconfiguration is
//! acknowledged too. If the link isn't ready after the initialization
//! timeout, the whole sequence starts over at 9600.

use crate::codec;
use crate::interface::DeviceInterface;
use crate::messages::{Message, Packet, PortConfig, UBX_CLASS_CFG, UBX_ID_CFG_PRT};
use crate::signal::{OnceSignal, Signal};
use crate::timer::{self, Timer};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

pub const LOW_BAUD: u32 = 9600;
pub const HIGH_BAUD: u32 = 115_200;

/// Timeouts driving link bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// How long to wait for a poll response at one baud rate
    pub detection: Duration,
    /// Restart the whole sequence if the link isn't ready by then
    pub initialization: Duration,
    /// Quiet time after a line speed change before anything is sent
    pub settle: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            detection: Duration::from_millis(500),
            initialization: Duration::from_millis(3000),
            settle: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    ProbingLowBaud,
    ProbingHighBaud,
    ConfiguringPort,
    Ready,
}

/// What the device knows about the link; reset on every restart
#[derive(Debug, Clone, Default)]
pub struct DeviceLinkState {
    pub last_used_baud_rate: u32,
    pub baud_rate_confirmed: bool,
    pub link_initialized: bool,
    pub pending_port_config: Option<PortConfig>,
}

/// Notifications returned from `UartDevice::poll`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Link is up; delivered once per device
    Ready,
    /// Application bytes were queued for `read`
    DataReady,
}

pub struct UartDevice<DI> {
    /// the device interface
    di: DI,
    phase: LinkPhase,
    link: DeviceLinkState,
    timing: LinkTiming,
    started: bool,
    settle_timer: Timer,
    detection_timer: Timer,
    init_timer: Timer,
    /// bytes held back while the line settles after a baud change
    deferred_tx: Vec<u8>,
    /// handshake bytes awaiting a complete frame
    handshake_rx: Vec<u8>,
    /// bytes received after the link became ready
    app_rx: Vec<u8>,
    ready: OnceSignal<()>,
    data_ready: Signal<()>,
}

impl<DI> UartDevice<DI>
where
    DI: DeviceInterface,
{
    pub fn new(device_interface: DI, timing: LinkTiming) -> Self {
        Self {
            di: device_interface,
            phase: LinkPhase::Disconnected,
            link: DeviceLinkState::default(),
            timing,
            started: false,
            settle_timer: Timer::new(),
            detection_timer: Timer::new(),
            init_timer: Timer::new(),
            deferred_tx: Vec::new(),
            handshake_rx: Vec::new(),
            app_rx: Vec::new(),
            ready: OnceSignal::new(),
            data_ready: Signal::new(),
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn link_state(&self) -> &DeviceLinkState {
        &self.link
    }

    pub fn is_ready(&self) -> bool {
        self.phase == LinkPhase::Ready
    }

    /// Port the receiver reported during the handshake, UART1 if unknown
    pub fn port_id(&self) -> u8 {
        self.link
            .pending_port_config
            .map(|cfg| cfg.port_id)
            .unwrap_or(1)
    }

    /// Subscribe to the one-shot link ready notification
    pub fn on_ready<F>(&mut self, slot: F)
    where
        F: FnMut(&()) + 'static,
    {
        self.ready.connect(slot);
    }

    pub fn on_data_ready<F>(&mut self, slot: F)
    where
        F: FnMut(&()) + 'static,
    {
        self.data_ready.connect(slot);
    }

    /// Send raw bytes. Allowed in any phase; held back while the line settles.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.settle_timer.is_active() {
            self.deferred_tx.extend_from_slice(bytes);
            return;
        }
        if let Err(e) = self.di.write_all(bytes) {
            warn!("write of {} bytes failed: {:?}", bytes.len(), e);
        }
    }

    /// Take all bytes received since the link became ready
    pub fn read(&mut self) -> Vec<u8> {
        if !self.is_ready() {
            return Vec::new();
        }
        std::mem::take(&mut self.app_rx)
    }

    pub fn has_data_pending(&self) -> bool {
        self.is_ready() && !self.app_rx.is_empty()
    }

    /// Earliest time at which `poll` has timer work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.started {
            return Some(Instant::now());
        }
        timer::earliest(vec![
            self.settle_timer.deadline(),
            self.detection_timer.deadline(),
            self.init_timer.deadline(),
        ])
    }

    pub fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        self.di.raw_fd()
    }

    /// Advance the link: pull received bytes, then run expired timers.
    pub fn poll(&mut self, now: Instant) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            self.begin_probing(now);
        }

        if self.settle_timer.expired(now) {
            self.flush_deferred();
        }

        let was_ready = self.is_ready();
        let app_before = self.app_rx.len();
        self.pump_input(now);
        if !was_ready && self.is_ready() && self.ready.emit(&()) {
            events.push(DeviceEvent::Ready);
        }
        if self.is_ready() && self.app_rx.len() > app_before {
            self.data_ready.emit(&());
            events.push(DeviceEvent::DataReady);
        }

        if self.detection_timer.expired(now) {
            self.on_detection_timeout(now);
        }
        if self.init_timer.expired(now) && !self.is_ready() {
            warn!(
                "link not ready after {:?} (phase {:?}), restarting baud detection",
                self.timing.initialization, self.phase
            );
            self.begin_probing(now);
        }

        events
    }

    /// Stop all timers and hand back the transport
    pub fn release(mut self) -> DI {
        self.cancel_timers();
        self.phase = LinkPhase::Disconnected;
        self.di
    }

    fn cancel_timers(&mut self) {
        self.settle_timer.cancel();
        self.detection_timer.cancel();
        self.init_timer.cancel();
    }

    fn begin_probing(&mut self, now: Instant) {
        self.cancel_timers();
        self.link = DeviceLinkState::default();
        self.deferred_tx.clear();
        self.handshake_rx.clear();
        self.phase = LinkPhase::ProbingLowBaud;
        self.init_timer.start(now, self.timing.initialization);
        self.probe(now, LOW_BAUD);
    }

    fn probe(&mut self, now: Instant, baud: u32) {
        debug!("probing receiver at {} baud", baud);
        // nothing queued for the old line speed is still meaningful
        self.deferred_tx.clear();
        self.apply_baud(now, baud);
        self.send(&Packet::poll(UBX_CLASS_CFG, UBX_ID_CFG_PRT));
        self.detection_timer.start(now, self.timing.detection);
    }

    fn apply_baud(&mut self, now: Instant, baud: u32) {
        if let Err(e) = self.di.set_baud_rate(baud) {
            warn!("cannot set line speed {}: {:?}", baud, e);
        }
        self.link.last_used_baud_rate = baud;
        // bytes heard at the previous speed are noise and may hold a false sync
        self.handshake_rx.clear();
        // the receiver garbles the first bytes right after a speed change
        self.settle_timer.start(now, self.timing.settle);
    }

    fn send(&mut self, packet: &Packet) {
        let frame = codec::encode(packet);
        self.write(&frame);
    }

    fn flush_deferred(&mut self) {
        if self.deferred_tx.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.deferred_tx);
        if let Err(e) = self.di.write_all(&pending) {
            warn!("write of {} deferred bytes failed: {:?}", pending.len(), e);
        }
    }

    fn pump_input(&mut self, now: Instant) {
        if let Err(e) = self.di.fill() {
            warn!("serial read failed: {:?}", e);
        }
        let mut chunk = [0u8; 256];
        loop {
            let count = self.di.read_many(&mut chunk);
            if count == 0 {
                break;
            }
            match self.phase {
                LinkPhase::Ready => self.app_rx.extend_from_slice(&chunk[..count]),
                LinkPhase::Disconnected => {}
                _ => {
                    self.handshake_rx.extend_from_slice(&chunk[..count]);
                    self.process_handshake(now);
                }
            }
        }
    }

    fn process_handshake(&mut self, now: Instant) {
        while !self.is_ready() {
            let (consumed, msg) = codec::decode_next(&self.handshake_rx);
            self.handshake_rx.drain(..consumed);
            match msg {
                Some(msg) => self.handle_handshake_message(now, msg),
                None => break,
            }
        }
        if self.is_ready() {
            // anything after the final ack belongs to the application
            let rest = std::mem::take(&mut self.handshake_rx);
            self.app_rx.extend(rest);
        }
    }

    fn handle_handshake_message(&mut self, now: Instant, msg: Message) {
        match msg {
            Message::PortConfig(cfg) => {
                debug!("receiver reports {:?}", cfg);
                self.link.pending_port_config = Some(cfg);
            }
            Message::Ack {
                class: UBX_CLASS_CFG,
                id: UBX_ID_CFG_PRT,
            } => {
                if !self.link.baud_rate_confirmed {
                    match self.phase {
                        LinkPhase::ProbingLowBaud | LinkPhase::ProbingHighBaud => {
                            self.confirm_baud(now)
                        }
                        _ => debug!("stray CFG-PRT ack in {:?}", self.phase),
                    }
                } else if self.phase == LinkPhase::ConfiguringPort {
                    info!("receiver link ready at {} baud", HIGH_BAUD);
                    self.phase = LinkPhase::Ready;
                    self.link.link_initialized = true;
                    self.init_timer.cancel();
                }
            }
            Message::Nack {
                class: UBX_CLASS_CFG,
                id: UBX_ID_CFG_PRT,
            } => {
                warn!("receiver rejected port configuration in {:?}", self.phase);
            }
            other => debug!("ignoring {:?} during link setup", other),
        }
    }

    fn confirm_baud(&mut self, now: Instant) {
        info!(
            "receiver answered at {} baud",
            self.link.last_used_baud_rate
        );
        self.link.baud_rate_confirmed = true;
        self.detection_timer.cancel();
        self.phase = LinkPhase::ConfiguringPort;

        let reported = match self.link.pending_port_config {
            Some(cfg) => cfg,
            None => {
                warn!("no port configuration received, assuming UART1 defaults");
                PortConfig::default()
            }
        };
        let wanted = reported.ubx_only(HIGH_BAUD);
        self.send(&wanted.to_packet());
        self.apply_baud(now, HIGH_BAUD);
    }

    fn on_detection_timeout(&mut self, now: Instant) {
        if self.link.last_used_baud_rate == LOW_BAUD {
            self.phase = LinkPhase::ProbingHighBaud;
            self.probe(now, HIGH_BAUD);
        } else {
            error!(
                "no response from receiver at {} or {} baud",
                LOW_BAUD, HIGH_BAUD
            );
            self.phase = LinkPhase::Disconnected;
        }
    }
}
