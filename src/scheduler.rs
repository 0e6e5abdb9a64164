use std::{
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use tracing::{debug, info};

// How often the worker wakes up to look for a suspend/resume gap.
const WAKE_CHECK_TICK: Duration = Duration::from_secs(10);
const WAKE_THRESHOLD: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Wake,
    Manual,
}

enum Command {
    Trigger,
    SetInterval(Duration),
    Shutdown,
}

/// Background timer that invokes a callback on interval, wake and manual
/// triggers. Every trigger restarts the interval countdown.
pub struct RefreshScheduler {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn start<F>(interval: Duration, on_trigger: F) -> Self
    where
        F: FnMut(Trigger) + Send + 'static,
    {
        Self::start_with_tick(interval, WAKE_CHECK_TICK, on_trigger)
    }

    fn start_with_tick<F>(interval: Duration, tick: Duration, mut on_trigger: F) -> Self
    where
        F: FnMut(Trigger) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            let mut interval = interval;
            let mut next_run = Instant::now() + interval;
            let mut wake = WakeDetector::new(Instant::now(), SystemTime::now());

            loop {
                let wait = next_run
                    .saturating_duration_since(Instant::now())
                    .min(tick);
                let fired = match rx.recv_timeout(wait) {
                    Ok(Command::Trigger) => Some(Trigger::Manual),
                    Ok(Command::SetInterval(new_interval)) => {
                        debug!(?new_interval, "refresh interval changed");
                        interval = new_interval;
                        next_run = Instant::now() + interval;
                        None
                    }
                    Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if wake.observe(Instant::now(), SystemTime::now()) {
                            Some(Trigger::Wake)
                        } else if Instant::now() >= next_run {
                            Some(Trigger::Timer)
                        } else {
                            None
                        }
                    }
                };

                if let Some(trigger) = fired {
                    debug!(?trigger, "refresh triggered");
                    on_trigger(trigger);
                    next_run = Instant::now() + interval;
                    wake.reset(Instant::now(), SystemTime::now());
                }
            }
            info!("refresh scheduler stopped");
        });

        Self {
            commands: tx,
            worker: Some(worker),
        }
    }

    pub fn trigger(&self) {
        let _ = self.commands.send(Command::Trigger);
    }

    /// A cloneable handle that can stop the scheduler from another thread.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            commands: self.commands.clone(),
        }
    }

    /// Blocks until the worker stops through a [`SchedulerHandle`].
    pub fn wait(mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Cancels the pending timer and schedules the next run `interval` from now.
    pub fn set_interval(&self, interval: Duration) {
        let _ = self.commands.send(Command::SetInterval(interval));
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[derive(Clone)]
pub struct SchedulerHandle {
    commands: Sender<Command>,
}

impl SchedulerHandle {
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Detects a system sleep: the wall clock keeps running while suspended but
/// the monotonic clock does not.
struct WakeDetector {
    mono: Instant,
    wall: SystemTime,
}

impl WakeDetector {
    fn new(mono: Instant, wall: SystemTime) -> Self {
        Self { mono, wall }
    }

    fn observe(&mut self, mono: Instant, wall: SystemTime) -> bool {
        let mono_elapsed = mono.saturating_duration_since(self.mono);
        let wall_elapsed = wall.duration_since(self.wall).unwrap_or_default();
        self.reset(mono, wall);
        wall_elapsed.saturating_sub(mono_elapsed) > WAKE_THRESHOLD
    }

    fn reset(&mut self, mono: Instant, wall: SystemTime) {
        self.mono = mono;
        self.wall = wall;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use super::*;

    fn recording(interval: Duration, tick: Duration) -> (RefreshScheduler, Receiver<Trigger>) {
        let (tx, rx) = mpsc::channel();
        let scheduler = RefreshScheduler::start_with_tick(interval, tick, move |trigger| {
            let _ = tx.send(trigger);
        });
        (scheduler, rx)
    }

    #[test]
    fn timer_fires_repeatedly() {
        let (scheduler, rx) = recording(Duration::from_millis(30), Duration::from_millis(10));
        for _ in 0..2 {
            assert_eq!(
                rx.recv_timeout(Duration::from_secs(2)).unwrap(),
                Trigger::Timer
            );
        }
        scheduler.shutdown();
    }

    #[test]
    fn manual_trigger_runs_immediately() {
        let (scheduler, rx) = recording(Duration::from_secs(3600), Duration::from_millis(10));
        scheduler.trigger();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Trigger::Manual
        );
        scheduler.shutdown();
    }

    #[test]
    fn set_interval_reschedules_the_timer() {
        let (scheduler, rx) = recording(Duration::from_secs(3600), Duration::from_millis(10));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        scheduler.set_interval(Duration::from_millis(20));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Trigger::Timer
        );
        scheduler.shutdown();
    }

    #[test]
    fn shutdown_stops_the_worker() {
        let (scheduler, rx) = recording(Duration::from_millis(10), Duration::from_millis(5));
        scheduler.shutdown();
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn wait_blocks_until_a_handle_shuts_down() {
        let (scheduler, _rx) = recording(Duration::from_secs(3600), Duration::from_millis(10));
        let handle = scheduler.handle();
        let (done_tx, done_rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            scheduler.wait();
            let _ = done_tx.send(());
        });

        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        handle.shutdown();
        done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("wait returned after shutdown");
        waiter.join().unwrap();
    }

    #[test]
    fn wake_detector_flags_wall_clock_jumps() {
        let mono = Instant::now();
        let wall = SystemTime::now();
        let mut detector = WakeDetector::new(mono, wall);

        assert!(!detector.observe(mono + Duration::from_secs(10), wall + Duration::from_secs(11)));
        assert!(detector.observe(
            mono + Duration::from_secs(20),
            wall + Duration::from_secs(11 + 10 + 600)
        ));
    }
}
