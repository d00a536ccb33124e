/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Keeps a UBX receiver streaming NAV-PVT at the rate we need and turns
//! the stream into telemetry.
//!
//! Settings are polled before anything is written, so a receiver that an
//! earlier session already configured is left alone.

use crate::codec;
use crate::device::{DeviceEvent, UartDevice};
use crate::interface::DeviceInterface;
use crate::messages::*;
use crate::signal::Signal;
use crate::telemetry::{FixMode, PositionProvider, PositionSample, PositionTelemetry, TelemetryModel};
use crate::ConfigPhase;
use chrono::{NaiveDate, NaiveTime};
use log::{debug, error, info, warn};
use std::os::unix::io::RawFd;
use std::time::Instant;

/// NAV-PVT on every navigation solution
pub const WANTED_PVT_RATE: u8 = 1;

/// 10 Hz measurements, one per solution, aligned to UTC
pub const WANTED_MEASUREMENT_RATE: MeasurementRate = MeasurementRate {
    meas_rate_ms: 100,
    nav_rate: 1,
    time_ref: TIME_REF_UTC,
};

/// Payload of the error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("receiver rejected {phase}")]
pub struct ConfigurationError {
    pub phase: ConfigPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    /// waiting for the link
    Idle,
    PollingMessageRate,
    EnablingMessageRate,
    PollingMeasurementRate,
    SettingMeasurementRate,
    /// configuration done, reports flowing
    Streaming,
    /// the receiver rejected a step; reports are still decoded
    Halted(ConfigPhase),
}

pub struct UbxPositionProvider<DI> {
    device: UartDevice<DI>,
    step: ReconcileStep,
    rx_buf: Vec<u8>,
    reported_message_rate: Option<MessageRate>,
    reported_measurement_rate: Option<MeasurementRate>,
    model: TelemetryModel,
    error_occurred: Signal<ConfigurationError>,
}

impl<DI> UbxPositionProvider<DI>
where
    DI: DeviceInterface,
{
    /// Take ownership of the device; reconciliation starts as soon as the
    /// link is ready, or on the first poll if it already is.
    pub fn new(device: UartDevice<DI>) -> Self {
        let mut provider = Self {
            device,
            step: ReconcileStep::Idle,
            rx_buf: Vec::new(),
            reported_message_rate: None,
            reported_measurement_rate: None,
            model: TelemetryModel::new(),
            error_occurred: Signal::new(),
        };
        if provider.device.is_ready() {
            provider.reconcile();
        }
        provider
    }

    pub fn device(&self) -> &UartDevice<DI> {
        &self.device
    }

    pub fn step(&self) -> ReconcileStep {
        self.step
    }

    pub fn on_error<F>(&mut self, slot: F)
    where
        F: FnMut(&ConfigurationError) + 'static,
    {
        self.error_occurred.connect(slot);
    }

    /// Start (or restart) the poll-then-configure sequence
    pub fn reconcile(&mut self) {
        self.reported_message_rate = None;
        self.reported_measurement_rate = None;
        self.step = ReconcileStep::PollingMessageRate;
        self.send(&MessageRate::poll_packet(UBX_CLASS_NAV, UBX_ID_NAV_PVT));
    }

    fn send(&mut self, packet: &Packet) {
        let frame = codec::encode(packet);
        self.device.write(&frame);
    }

    fn fail(&mut self, phase: ConfigPhase) {
        let err = ConfigurationError { phase };
        error!("{}", err);
        self.step = ReconcileStep::Halted(phase);
        self.error_occurred.emit(&err);
    }

    fn drain_device(&mut self) {
        let bytes = self.device.read();
        self.rx_buf.extend_from_slice(&bytes);
        let decoded = codec::decode(&self.rx_buf);
        self.rx_buf.drain(..decoded.consumed);
        for msg in decoded.messages {
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::NavPvt(pvt) => self.handle_nav_pvt(&pvt),
            Message::MessageRate(rate) => {
                if rate.msg_class == UBX_CLASS_NAV && rate.msg_id == UBX_ID_NAV_PVT {
                    self.reported_message_rate = Some(rate);
                }
            }
            Message::MeasurementRate(rate) => self.reported_measurement_rate = Some(rate),
            Message::Ack {
                class: UBX_CLASS_CFG,
                id,
            } => self.handle_ack(id),
            Message::Nack {
                class: UBX_CLASS_CFG,
                id,
            } => self.handle_nack(id),
            other => debug!("ignoring {:?}", other),
        }
    }

    fn handle_ack(&mut self, id: u8) {
        match (self.step, id) {
            (ReconcileStep::PollingMessageRate, UBX_ID_CFG_MSG) => {
                let port_id = self.device.port_id();
                let current = self
                    .reported_message_rate
                    .map(|rate| rate.rate_on_port(port_id));
                if current == Some(WANTED_PVT_RATE) {
                    info!("NAV-PVT rate already {}", WANTED_PVT_RATE);
                    self.poll_measurement_rate();
                } else {
                    info!("NAV-PVT rate is {:?}, setting {}", current, WANTED_PVT_RATE);
                    self.step = ReconcileStep::EnablingMessageRate;
                    self.send(&MessageRate::set_packet(
                        UBX_CLASS_NAV,
                        UBX_ID_NAV_PVT,
                        WANTED_PVT_RATE,
                    ));
                }
            }
            (ReconcileStep::EnablingMessageRate, UBX_ID_CFG_MSG) => {
                self.poll_measurement_rate();
            }
            (ReconcileStep::PollingMeasurementRate, UBX_ID_CFG_RATE) => {
                match self.reported_measurement_rate {
                    Some(rate) if rate == WANTED_MEASUREMENT_RATE => {
                        info!("measurement rate already {:?}", rate);
                        self.step = ReconcileStep::Streaming;
                    }
                    reported => {
                        info!(
                            "measurement rate is {:?}, setting {:?}",
                            reported, WANTED_MEASUREMENT_RATE
                        );
                        self.step = ReconcileStep::SettingMeasurementRate;
                        self.send(&WANTED_MEASUREMENT_RATE.to_packet());
                    }
                }
            }
            (ReconcileStep::SettingMeasurementRate, UBX_ID_CFG_RATE) => {
                info!("receiver configured, streaming NAV-PVT");
                self.step = ReconcileStep::Streaming;
            }
            (step, id) => debug!("unexpected CFG ack for {:02x} in {:?}", id, step),
        }
    }

    fn handle_nack(&mut self, id: u8) {
        match (self.step, id) {
            (ReconcileStep::PollingMessageRate, UBX_ID_CFG_MSG) => {
                self.fail(ConfigPhase::MessageRatePoll)
            }
            (ReconcileStep::EnablingMessageRate, UBX_ID_CFG_MSG) => {
                self.fail(ConfigPhase::MessageRateEnable)
            }
            (ReconcileStep::PollingMeasurementRate, UBX_ID_CFG_RATE) => {
                self.fail(ConfigPhase::MeasurementRatePoll)
            }
            (ReconcileStep::SettingMeasurementRate, UBX_ID_CFG_RATE) => {
                self.fail(ConfigPhase::MeasurementRateEnable)
            }
            (step, id) => warn!("unexpected CFG nack for {:02x} in {:?}", id, step),
        }
    }

    fn poll_measurement_rate(&mut self) {
        self.step = ReconcileStep::PollingMeasurementRate;
        self.send(&Packet::poll(UBX_CLASS_CFG, UBX_ID_CFG_RATE));
    }

    fn handle_nav_pvt(&mut self, pvt: &NavPosVelTimeM8) {
        let sample = sample_from_nav_pvt(pvt);
        self.model.publish(&sample);
    }
}

impl<DI> PositionProvider for UbxPositionProvider<DI>
where
    DI: DeviceInterface,
{
    fn telemetry(&self) -> &TelemetryModel {
        &self.model
    }

    fn telemetry_mut(&mut self) -> &mut TelemetryModel {
        &mut self.model
    }

    fn poll(&mut self, now: Instant) {
        for event in self.device.poll(now) {
            match event {
                DeviceEvent::Ready => self.reconcile(),
                DeviceEvent::DataReady => self.drain_device(),
            }
        }
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        self.device.raw_fd()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.device.next_deadline()
    }
}

/// Convert a NAV-PVT report into a telemetry sample
pub fn sample_from_nav_pvt(pvt: &NavPosVelTimeM8) -> PositionSample {
    let millis = (pvt.nanosecond.max(0) / 1_000_000) as u32;
    let time = if pvt.sec >= 60 {
        // leap second
        NaiveTime::from_hms_milli_opt(pvt.hour as u32, pvt.min as u32, 59, 1000 + millis)
    } else {
        NaiveTime::from_hms_milli_opt(pvt.hour as u32, pvt.min as u32, pvt.sec as u32, millis)
    };
    let date = NaiveDate::from_ymd_opt(pvt.year as i32, pvt.month as u32, pvt.day as u32);

    PositionSample {
        telemetry: PositionTelemetry {
            latitude: (pvt.lat as f64 / 1e7) as f32,
            longitude: (pvt.lon as f64 / 1e7) as f32,
            time: time.unwrap_or_default(),
            date: date.unwrap_or_default(),
            velocity: pvt.ground_speed as f32 / 1000.0,
        },
        satellites: pvt.num_satellites,
        fix_mode: FixMode::from_wire(pvt.fix_type as i32),
    }
}
