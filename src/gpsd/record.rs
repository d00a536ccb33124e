/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

use crate::telemetry::{FixMode, PositionSample, PositionTelemetry};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Timelike};

/// Size of one record on the pipe
pub const RECORD_LEN: usize = 34;

/// One fix as relayed from the gpsd worker to the foreground
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FixRecord {
    /// degrees
    pub longitude: f32,
    /// degrees
    pub latitude: f32,
    /// meters/second
    pub velocity: f64,
    /// seconds since the Unix epoch, UTC
    pub time_seconds: i64,
    pub time_nanoseconds: i64,
    pub satellites: u8,
    /// gpsd mode: 1 none, 2 2D, 3 3D
    pub fix_mode: u8,
}

impl FixRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        LittleEndian::write_f32(&mut buf[0..4], self.longitude);
        LittleEndian::write_f32(&mut buf[4..8], self.latitude);
        LittleEndian::write_f64(&mut buf[8..16], self.velocity);
        LittleEndian::write_i64(&mut buf[16..24], self.time_seconds);
        LittleEndian::write_i64(&mut buf[24..32], self.time_nanoseconds);
        buf[32] = self.satellites;
        buf[33] = self.fix_mode;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < RECORD_LEN {
            return None;
        }
        Some(Self {
            longitude: LittleEndian::read_f32(&buf[0..4]),
            latitude: LittleEndian::read_f32(&buf[4..8]),
            velocity: LittleEndian::read_f64(&buf[8..16]),
            time_seconds: LittleEndian::read_i64(&buf[16..24]),
            time_nanoseconds: LittleEndian::read_i64(&buf[24..32]),
            satellites: buf[32],
            fix_mode: buf[33],
        })
    }

    /// Split the epoch time into time of day (ms resolution) and date
    pub fn to_sample(&self) -> PositionSample {
        let nanos = self.time_nanoseconds.clamp(0, 999_999_999) as u32;
        let (time, date) = match DateTime::from_timestamp(self.time_seconds, nanos) {
            Some(stamp) => {
                let naive = stamp.naive_utc();
                let truncated = naive.nanosecond() / 1_000_000 * 1_000_000;
                (
                    naive
                        .time()
                        .with_nanosecond(truncated)
                        .unwrap_or_else(|| naive.time()),
                    naive.date(),
                )
            }
            None => Default::default(),
        };

        PositionSample {
            telemetry: PositionTelemetry {
                latitude: self.latitude,
                longitude: self.longitude,
                time,
                date,
                velocity: self.velocity as f32,
            },
            satellites: self.satellites,
            fix_mode: FixMode::from_wire(self.fix_mode as i32),
        }
    }
}
