/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Position telemetry shared by every position source

use crate::signal::Signal;
use chrono::{NaiveDate, NaiveTime};
use std::os::unix::io::RawFd;
use std::time::Instant;

/// Quality of the satellite lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    NoFix,
    Fix2d,
    Fix3d,
}

impl FixMode {
    /// Map a wire value (1 = none, 2 = 2D, 3 = 3D); anything else is no fix
    pub fn from_wire(value: i32) -> Self {
        match value {
            2 => FixMode::Fix2d,
            3 => FixMode::Fix3d,
            _ => FixMode::NoFix,
        }
    }
}

impl Default for FixMode {
    fn default() -> Self {
        FixMode::NoFix
    }
}

/// One position report
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionTelemetry {
    /// degrees
    pub latitude: f32,
    /// degrees
    pub longitude: f32,
    /// UTC time of day, millisecond resolution
    pub time: NaiveTime,
    /// UTC date
    pub date: NaiveDate,
    /// ground speed, meters/second
    pub velocity: f32,
}

impl PositionTelemetry {
    /// `dd.MM.yyyy`
    pub fn date_string(&self) -> String {
        self.date.format("%d.%m.%Y").to_string()
    }

    /// `hh:mm:ss.zzz`
    pub fn time_string(&self) -> String {
        self.time.format("%H:%M:%S%.3f").to_string()
    }
}

/// Everything a source learns from one report
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSample {
    pub telemetry: PositionTelemetry,
    pub satellites: u8,
    pub fix_mode: FixMode,
}

/// Current telemetry plus its change notifications.
///
/// Position, time, date and velocity are republished on every sample, even
/// when unchanged; satellite count and fix mode notify only when they change.
#[derive(Default)]
pub struct TelemetryModel {
    position: Option<PositionTelemetry>,
    satellites: u8,
    fix_mode: FixMode,
    telemetry_updated: Signal<PositionTelemetry>,
    satellites_changed: Signal<u8>,
    fix_mode_changed: Signal<FixMode>,
}

impl TelemetryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<&PositionTelemetry> {
        self.position.as_ref()
    }

    pub fn satellites(&self) -> u8 {
        self.satellites
    }

    pub fn fix_mode(&self) -> FixMode {
        self.fix_mode
    }

    pub fn on_telemetry<F>(&mut self, slot: F)
    where
        F: FnMut(&PositionTelemetry) + 'static,
    {
        self.telemetry_updated.connect(slot);
    }

    pub fn on_satellites_changed<F>(&mut self, slot: F)
    where
        F: FnMut(&u8) + 'static,
    {
        self.satellites_changed.connect(slot);
    }

    pub fn on_fix_mode_changed<F>(&mut self, slot: F)
    where
        F: FnMut(&FixMode) + 'static,
    {
        self.fix_mode_changed.connect(slot);
    }

    pub fn publish(&mut self, sample: &PositionSample) {
        self.position = Some(sample.telemetry);
        self.telemetry_updated.emit(&sample.telemetry);

        if sample.satellites != self.satellites {
            self.satellites = sample.satellites;
            self.satellites_changed.emit(&self.satellites);
        }
        if sample.fix_mode != self.fix_mode {
            self.fix_mode = sample.fix_mode;
            self.fix_mode_changed.emit(&self.fix_mode);
        }
    }
}

/// A source of position telemetry driven by an event loop
pub trait PositionProvider {
    fn telemetry(&self) -> &TelemetryModel;

    fn telemetry_mut(&mut self) -> &mut TelemetryModel;

    /// Do whatever I/O and timer work is due at `now`
    fn poll(&mut self, now: Instant);

    /// Descriptor to wait on for readability, if the source has one
    fn readiness_fd(&self) -> Option<RawFd> {
        None
    }

    /// Next time `poll` must run even without input
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn fix_mode(&self) -> FixMode {
        self.telemetry().fix_mode()
    }

    fn satellites(&self) -> u8 {
        self.telemetry().satellites()
    }

    fn position(&self) -> Option<PositionTelemetry> {
        self.telemetry().position().copied()
    }
}

/// Publishes a fixed sample; for tests and demos without a receiver
pub struct StaticPositionProvider {
    model: TelemetryModel,
    sample: PositionSample,
    published: bool,
}

impl StaticPositionProvider {
    pub fn new(sample: PositionSample) -> Self {
        Self {
            model: TelemetryModel::new(),
            sample,
            published: false,
        }
    }

    /// Replace the sample; it is published on the next poll
    pub fn set_sample(&mut self, sample: PositionSample) {
        self.sample = sample;
        self.published = false;
    }
}

impl PositionProvider for StaticPositionProvider {
    fn telemetry(&self) -> &TelemetryModel {
        &self.model
    }

    fn telemetry_mut(&mut self) -> &mut TelemetryModel {
        &mut self.model
    }

    fn poll(&mut self, _now: Instant) {
        if !self.published {
            self.published = true;
            self.model.publish(&self.sample);
        }
    }
}
