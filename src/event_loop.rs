/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! Drives a `PositionProvider` from descriptor readiness and its deadlines

use crate::telemetry::PositionProvider;
use log::{debug, warn};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest wait between polls; also bounds how fast a stop request is seen
pub const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Wait until `fd` is readable or `timeout` passes; true when readable
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(false);
    }
    if pfd.revents & libc::POLLIN != 0 {
        return Ok(true);
    }
    if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
        // hung up with nothing to read; poll(2) would return at once forever
        thread::sleep(timeout);
    }
    Ok(false)
}

/// How long to wait from `now` given the provider's next deadline
fn wait_budget(deadline: Option<Instant>, now: Instant) -> Duration {
    match deadline {
        Some(at) => at.saturating_duration_since(now).min(IDLE_WAIT),
        None => IDLE_WAIT,
    }
}

/// Wait for input or the next deadline, then poll the provider once
pub fn run_once<P: PositionProvider + ?Sized>(provider: &mut P, now: Instant) -> io::Result<()> {
    let budget = wait_budget(provider.next_deadline(), now);
    match provider.readiness_fd() {
        Some(fd) => {
            wait_readable(fd, budget)?;
        }
        None => thread::sleep(budget),
    }
    provider.poll(Instant::now());
    Ok(())
}

/// Poll until `running` is cleared
pub fn run<P: PositionProvider + ?Sized>(provider: &mut P, running: &AtomicBool) -> io::Result<()> {
    // first poll kicks off link bring-up
    provider.poll(Instant::now());
    while running.load(Ordering::SeqCst) {
        if let Err(e) = run_once(provider, Instant::now()) {
            warn!("readiness wait failed: {}", e);
            return Err(e);
        }
    }
    debug!("event loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{
        FixMode, PositionSample, StaticPositionProvider, TelemetryModel,
    };
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn readable_after_write() {
        let (mut a, b) = UnixStream::pair().unwrap();
        assert!(!wait_readable(b.as_raw_fd(), Duration::from_millis(10)).unwrap());
        a.write_all(b"x").unwrap();
        assert!(wait_readable(b.as_raw_fd(), Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn budget_follows_deadline() {
        let now = Instant::now();
        assert_eq!(wait_budget(None, now), IDLE_WAIT);
        assert_eq!(
            wait_budget(Some(now + Duration::from_millis(30)), now),
            Duration::from_millis(30)
        );
        assert_eq!(wait_budget(Some(now), now + Duration::from_secs(1)), Duration::ZERO);
        assert_eq!(wait_budget(Some(now + Duration::from_secs(5)), now), IDLE_WAIT);
    }

    /// Counts polls and stops the loop after a few
    struct Counting<'a> {
        model: TelemetryModel,
        polls: usize,
        stop_after: usize,
        running: &'a AtomicBool,
        fd: Option<RawFd>,
    }

    impl PositionProvider for Counting<'_> {
        fn telemetry(&self) -> &TelemetryModel {
            &self.model
        }

        fn telemetry_mut(&mut self) -> &mut TelemetryModel {
            &mut self.model
        }

        fn poll(&mut self, _now: Instant) {
            self.polls += 1;
            if self.polls >= self.stop_after {
                self.running.store(false, Ordering::SeqCst);
            }
        }

        fn readiness_fd(&self) -> Option<RawFd> {
            self.fd
        }

        fn next_deadline(&self) -> Option<Instant> {
            Some(Instant::now() + Duration::from_millis(1))
        }
    }

    #[test]
    fn run_polls_until_stopped() {
        let running = AtomicBool::new(true);
        let (_a, b) = UnixStream::pair().unwrap();
        let mut provider = Counting {
            model: TelemetryModel::new(),
            polls: 0,
            stop_after: 4,
            running: &running,
            fd: Some(b.as_raw_fd()),
        };
        run(&mut provider, &running).unwrap();
        assert_eq!(provider.polls, 4);
    }

    #[test]
    fn run_once_without_fd_publishes() {
        let mut provider = StaticPositionProvider::new(PositionSample {
            satellites: 4,
            fix_mode: FixMode::Fix3d,
            ..Default::default()
        });
        run_once(&mut provider, Instant::now()).unwrap();
        assert_eq!(provider.satellites(), 4);
    }

    #[test]
    fn boxed_provider_runs() {
        let mut provider: Box<dyn PositionProvider> =
            Box::new(StaticPositionProvider::new(PositionSample::default()));
        let running = AtomicBool::new(false);
        run(provider.as_mut(), &running).unwrap();
        assert!(provider.position().is_some());
    }
}
