/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Background gpsd client that relays fixes into the pipe

use super::fifo::open_writer;
use super::record::{FixRecord, RECORD_LEN};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Subscription request sent after connecting
pub const WATCH_REQUEST: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum Report {
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "SKY")]
    Sky(Sky),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    time: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Sky {
    #[serde(rename = "uSat")]
    used_count: Option<u8>,
    #[serde(default)]
    satellites: Vec<SkySatellite>,
}

#[derive(Debug, Deserialize)]
struct SkySatellite {
    #[serde(default)]
    used: bool,
}

/// Turns gpsd JSON reports into fix records.
///
/// SKY reports only update the satellite count carried into later records.
#[derive(Debug, Default)]
pub struct ReportDecoder {
    satellites: u8,
}

impl ReportDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn satellites(&self) -> u8 {
        self.satellites
    }

    /// Decode one report line; a record comes out of TPV reports with a settled mode
    pub fn decode_line(&mut self, line: &str) -> Option<FixRecord> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let report: Report = match serde_json::from_str(line) {
            Ok(report) => report,
            Err(e) => {
                debug!("ignoring gpsd line: {}", e);
                return None;
            }
        };

        match report {
            Report::Sky(sky) => {
                let used = sky.satellites.iter().filter(|s| s.used).count();
                self.satellites = sky
                    .used_count
                    .unwrap_or_else(|| used.min(u8::MAX as usize) as u8);
                None
            }
            Report::Tpv(tpv) => self.record_from_tpv(&tpv),
            Report::Other => None,
        }
    }

    fn record_from_tpv(&self, tpv: &Tpv) -> Option<FixRecord> {
        if !(1..=3).contains(&tpv.mode) {
            return None;
        }
        let stamp = tpv
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(FixRecord {
            longitude: tpv.lon.unwrap_or(0.0) as f32,
            latitude: tpv.lat.unwrap_or(0.0) as f32,
            velocity: tpv.speed.unwrap_or(0.0),
            time_seconds: stamp.timestamp(),
            time_nanoseconds: stamp.timestamp_subsec_nanos() as i64,
            satellites: self.satellites,
            fix_mode: tpv.mode,
        })
    }
}

/// Worker thread connected to gpsd on one side and the pipe on the other
pub struct GpsdWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpsdWorker {
    /// Start the worker; it opens the write end of `pipe` itself
    pub fn spawn(address: String, pipe: PathBuf, read_timeout: Duration) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("gpsd-bridge".into())
            .spawn(move || relay(&address, &pipe, read_timeout, &flag))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the running flag and wait for the thread.
    ///
    /// Returns within one read timeout, since pipe writes never block.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("gpsd worker panicked");
            }
        }
    }
}

impl Drop for GpsdWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn relay(address: &str, pipe: &Path, read_timeout: Duration, running: &AtomicBool) {
    // the foreground opened the read end before spawning us
    let mut sink = match open_writer(pipe) {
        Ok(file) => file,
        Err(e) => {
            warn!("gpsd worker cannot open {}: {}", pipe.display(), e);
            running.store(false, Ordering::SeqCst);
            return;
        }
    };

    let mut decoder = ReportDecoder::new();
    while running.load(Ordering::SeqCst) {
        match connect(address, read_timeout) {
            Ok(stream) => {
                info!("connected to gpsd at {}", address);
                if let Err(e) = stream_reports(stream, &mut sink, &mut decoder, running) {
                    warn!("gpsd connection lost: {}", e);
                }
            }
            Err(e) => debug!("gpsd at {} unavailable: {}", address, e),
        }
        if running.load(Ordering::SeqCst) {
            thread::sleep(read_timeout);
        }
    }
    debug!("gpsd worker stopped");
}

fn connect(address: &str, read_timeout: Duration) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect(address)?;
    stream.set_read_timeout(Some(read_timeout))?;
    stream.write_all(WATCH_REQUEST)?;
    Ok(stream)
}

fn stream_reports<W: Write>(
    stream: TcpStream,
    sink: &mut W,
    decoder: &mut ReportDecoder,
    running: &AtomicBool,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    while running.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "gpsd closed the connection",
                ))
            }
            Ok(_) => {
                if line.last() != Some(&b'\n') {
                    continue;
                }
                let text = String::from_utf8_lossy(&line);
                if let Some(record) = decoder.decode_line(&text) {
                    match sink.write(&record.to_bytes()) {
                        Ok(n) if n == RECORD_LEN => {}
                        // records are below PIPE_BUF, so writes are all or nothing
                        Ok(n) => warn!("short pipe write of {} bytes", n),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            warn!("dropping fix, reader is not keeping up")
                        }
                        Err(e) => warn!("dropping fix, pipe write failed: {}", e),
                    }
                }
                line.clear();
            }
            // partial line stays buffered until the rest arrives
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TPV: &str = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":3,"time":"1970-01-01T01:01:01.001Z","lat":11.0,"lon":10.0,"speed":0.015}"#;

    #[test]
    fn tpv_becomes_record() {
        let mut decoder = ReportDecoder::new();
        let rec = decoder.decode_line(TPV).unwrap();
        assert_eq!(rec.latitude, 11.0);
        assert_eq!(rec.longitude, 10.0);
        assert_eq!(rec.velocity, 0.015);
        assert_eq!(rec.time_seconds, 3661);
        assert_eq!(rec.time_nanoseconds, 1_000_000);
        assert_eq!(rec.fix_mode, 3);
        assert_eq!(rec.satellites, 0);
    }

    #[test]
    fn sky_sets_satellites_for_later_fixes() {
        let mut decoder = ReportDecoder::new();
        let sky = r#"{"class":"SKY","satellites":[{"PRN":1,"used":true},{"PRN":2,"used":false},{"PRN":3,"used":true}]}"#;
        assert!(decoder.decode_line(sky).is_none());
        assert_eq!(decoder.satellites(), 2);

        assert!(decoder
            .decode_line(r#"{"class":"SKY","uSat":9,"satellites":[]}"#)
            .is_none());
        assert_eq!(decoder.decode_line(TPV).unwrap().satellites, 9);
    }

    #[test]
    fn unsettled_mode_and_noise_are_ignored() {
        let mut decoder = ReportDecoder::new();
        assert!(decoder.decode_line(r#"{"class":"TPV","mode":0}"#).is_none());
        assert!(decoder
            .decode_line(r#"{"class":"VERSION","release":"3.22"}"#)
            .is_none());
        assert!(decoder.decode_line("not json").is_none());
        assert!(decoder.decode_line("").is_none());
        assert!(decoder.decode_line(r#"{"class":"TPV","mode":1}"#).is_some());
    }

    #[test]
    fn missing_time_uses_clock() {
        let mut decoder = ReportDecoder::new();
        let before = Utc::now().timestamp();
        let rec = decoder.decode_line(r#"{"class":"TPV","mode":2}"#).unwrap();
        assert!(rec.time_seconds >= before);
        assert_eq!(rec.fix_mode, 2);
    }

    #[test]
    fn reports_stream_into_sink() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(conn.try_clone().unwrap());
            let mut request = String::new();
            reader.read_line(&mut request).unwrap();
            conn.write_all(b"{\"class\":\"VERSION\"}\n").unwrap();
            conn.write_all(TPV[..20].as_bytes()).unwrap();
            conn.flush().unwrap();
            thread::sleep(Duration::from_millis(50));
            conn.write_all(TPV[20..].as_bytes()).unwrap();
            conn.write_all(b"\n").unwrap();
            request
        });

        let stream = connect(&addr.to_string(), Duration::from_millis(20)).unwrap();
        let mut sink = Vec::new();
        let mut decoder = ReportDecoder::new();
        let running = AtomicBool::new(true);
        let result = stream_reports(stream, &mut sink, &mut decoder, &running);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(server.join().unwrap().as_bytes(), WATCH_REQUEST);
        let rec = FixRecord::from_bytes(&sink).unwrap();
        assert_eq!(sink.len(), super::super::record::RECORD_LEN);
        assert_eq!(rec.time_seconds, 3661);
    }
}
