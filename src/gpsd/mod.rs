/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Position source bridged from gpsd.
//!
//! A worker thread talks to gpsd and writes one `FixRecord` per fix into a
//! named pipe; the provider owns the read end and republishes each record
//! through the shared telemetry model.

mod client;
mod fifo;
mod record;

pub use client::{GpsdWorker, ReportDecoder, WATCH_REQUEST};
pub use fifo::{create_fifo, open_reader, open_writer};
pub use record::{FixRecord, RECORD_LEN};

use crate::config::GpsdConfig;
use crate::telemetry::{PositionProvider, TelemetryModel};
use crate::SetupError;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct GpsdPositionProvider {
    model: TelemetryModel,
    pipe_path: PathBuf,
    reader: File,
    pending: Vec<u8>,
    worker: Option<GpsdWorker>,
}

impl GpsdPositionProvider {
    /// Recreate the pipe, open its read end, then start the worker
    pub fn new(config: &GpsdConfig) -> Result<Self, SetupError> {
        let mut provider = Self::open(&config.pipe)?;
        let worker = GpsdWorker::spawn(
            config.address.clone(),
            config.pipe.clone(),
            config.read_timeout(),
        )
        .map_err(SetupError::Spawn)?;
        provider.worker = Some(worker);
        Ok(provider)
    }

    /// Pipe side only; records are written by someone else
    pub(crate) fn open(pipe: &Path) -> Result<Self, SetupError> {
        create_fifo(pipe)?;
        let reader = open_reader(pipe)?;
        Ok(Self {
            model: TelemetryModel::new(),
            pipe_path: pipe.to_path_buf(),
            reader,
            pending: Vec::with_capacity(RECORD_LEN * 4),
            worker: None,
        })
    }

    pub fn pipe_path(&self) -> &Path {
        &self.pipe_path
    }

    pub fn worker_running(&self) -> bool {
        self.worker.as_ref().map_or(false, GpsdWorker::is_running)
    }

    fn fill(&mut self) {
        let mut chunk = [0u8; RECORD_LEN * 8];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("pipe read failed: {}", e);
                    break;
                }
            }
        }
    }
}

impl PositionProvider for GpsdPositionProvider {
    fn telemetry(&self) -> &TelemetryModel {
        &self.model
    }

    fn telemetry_mut(&mut self) -> &mut TelemetryModel {
        &mut self.model
    }

    fn poll(&mut self, _now: Instant) {
        self.fill();
        let complete = self.pending.len() / RECORD_LEN * RECORD_LEN;
        for chunk in self.pending[..complete].chunks_exact(RECORD_LEN) {
            if let Some(record) = FixRecord::from_bytes(chunk) {
                self.model.publish(&record.to_sample());
            }
        }
        if complete > 0 {
            debug!("{} fix records from pipe", complete / RECORD_LEN);
            self.pending.drain(..complete);
        }
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        Some(self.reader.as_raw_fd())
    }
}

impl Drop for GpsdPositionProvider {
    fn drop(&mut self) {
        // stop the writer before the read end closes
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::FixMode;
    use std::cell::RefCell;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::time::Duration;

    fn record(satellites: u8, fix_mode: u8) -> FixRecord {
        FixRecord {
            longitude: 10.0,
            latitude: 11.0,
            velocity: 0.015,
            time_seconds: 3661,
            time_nanoseconds: 1_000_000,
            satellites,
            fix_mode,
        }
    }

    #[test]
    fn records_from_pipe_are_published() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = dir.path().join("position_pipe");
        let mut provider = GpsdPositionProvider::open(&pipe).unwrap();
        assert!(provider.readiness_fd().is_some());
        assert_eq!(provider.pipe_path(), pipe.as_path());
        assert!(!provider.worker_running());

        let modes = Rc::new(RefCell::new(Vec::new()));
        let m = modes.clone();
        provider
            .telemetry_mut()
            .on_fix_mode_changed(move |f| m.borrow_mut().push(*f));
        let updates = Rc::new(RefCell::new(0));
        let u = updates.clone();
        provider.telemetry_mut().on_telemetry(move |_| *u.borrow_mut() += 1);

        let mut writer = OpenOptions::new().write(true).open(&pipe).unwrap();
        writer.write_all(&record(6, 3).to_bytes()).unwrap();
        writer.write_all(&record(6, 3).to_bytes()).unwrap();
        // half a record waits for the rest
        let third = record(7, 2).to_bytes();
        writer.write_all(&third[..10]).unwrap();
        provider.poll(Instant::now());

        assert_eq!(*updates.borrow(), 2);
        assert_eq!(*modes.borrow(), vec![FixMode::Fix3d]);
        let position = provider.position().unwrap();
        assert_eq!(position.latitude, 11.0);
        assert_eq!(position.longitude, 10.0);
        assert_eq!(position.time_string(), "01:01:01.001");
        assert_eq!(position.date_string(), "01.01.1970");
        assert_eq!(provider.satellites(), 6);

        writer.write_all(&third[10..]).unwrap();
        provider.poll(Instant::now());
        assert_eq!(*updates.borrow(), 3);
        assert_eq!(*modes.borrow(), vec![FixMode::Fix3d, FixMode::Fix2d]);
        assert_eq!(provider.satellites(), 7);
    }

    #[test]
    fn uncreatable_pipe_fails_setup() {
        let config = GpsdConfig {
            pipe: PathBuf::from("/nonexistent/dir/position_pipe"),
            ..GpsdConfig::default()
        };
        let result = GpsdPositionProvider::new(&config);
        assert!(matches!(result, Err(SetupError::Pipe { .. })));
    }

    #[test]
    fn fixes_flow_from_daemon_to_telemetry() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = GpsdConfig {
            address: listener.local_addr().unwrap().to_string(),
            pipe: dir.path().join("position_pipe"),
            read_timeout_ms: 20,
        };
        let daemon = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"{\"class\":\"SKY\",\"uSat\":8}\n").unwrap();
            conn.write_all(
                b"{\"class\":\"TPV\",\"mode\":3,\"time\":\"1970-01-01T01:01:01.001Z\",\"lat\":11.0,\"lon\":10.0,\"speed\":0.015}\n",
            )
            .unwrap();
            // keep the connection open until the test is done reading
            std::thread::sleep(Duration::from_millis(500));
        });

        let mut provider = GpsdPositionProvider::new(&config).unwrap();
        assert!(provider.worker_running());
        let deadline = Instant::now() + Duration::from_secs(5);
        while provider.position().is_none() && Instant::now() < deadline {
            provider.poll(Instant::now());
            std::thread::sleep(Duration::from_millis(10));
        }

        let position = provider.position().unwrap();
        assert_eq!(position.latitude, 11.0);
        assert_eq!(provider.satellites(), 8);
        assert_eq!(provider.fix_mode(), FixMode::Fix3d);
        drop(provider);
        daemon.join().unwrap();
    }

    #[test]
    fn stalled_reader_does_not_block_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = GpsdConfig {
            address: listener.local_addr().unwrap().to_string(),
            pipe: dir.path().join("position_pipe"),
            read_timeout_ms: 20,
        };
        let daemon = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let line = b"{\"class\":\"TPV\",\"mode\":3,\"time\":\"1970-01-01T01:01:01.001Z\",\"lat\":11.0,\"lon\":10.0}\n";
            // far more records than the pipe holds
            for _ in 0..4000 {
                if conn.write_all(line).is_err() {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(300));
        });

        let provider = GpsdPositionProvider::new(&config).unwrap();
        // never polled; the pipe fills up behind the worker
        std::thread::sleep(Duration::from_millis(500));
        assert!(provider.worker_running());

        let started = Instant::now();
        drop(provider);
        assert!(started.elapsed() < Duration::from_secs(2));
        daemon.join().unwrap();
    }
}
