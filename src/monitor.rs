use std::{
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
    license::{LicenseReport, LicenseSource},
    status::{ConnectionState, StatusSource},
};

const DEFAULT_STALL_LIMIT: Duration = Duration::from_secs(60);

enum MonitorEvent {
    Status {
        generation: u64,
        state: ConnectionState,
    },
    License {
        generation: u64,
        report: LicenseReport,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorUpdate {
    Status(ConnectionState),
    License(LicenseReport),
}

/// Issues numbered polls and accepts only the newest one's result.
#[derive(Default)]
struct PollTracker {
    issued: u64,
    in_flight: Option<(u64, Instant)>,
}

impl PollTracker {
    /// Numbers a new poll unless one is still running. A poll running for
    /// `stall_limit` or longer is abandoned and its result will be stale.
    fn start(&mut self, now: Instant, stall_limit: Duration) -> Option<u64> {
        if let Some((generation, started)) = self.in_flight {
            if now.saturating_duration_since(started) < stall_limit {
                return None;
            }
            log::warn!("[monitor] poll #{generation} stalled, starting a new one");
        }
        self.issued += 1;
        self.in_flight = Some((self.issued, now));
        Some(self.issued)
    }

    /// Records a finished poll; true when its result is still current.
    fn finish(&mut self, generation: u64) -> bool {
        if matches!(self.in_flight, Some((running, _)) if running == generation) {
            self.in_flight = None;
        }
        generation == self.issued
    }
}

/// Polls connection status on every tick and the licence every
/// `license_refresh_ticks` ticks, each on a one-shot worker thread.
/// Results come back through a channel and are applied on the caller's
/// thread, so the monitor itself is never shared.
pub struct StatusMonitor {
    status_source: Arc<dyn StatusSource>,
    license_source: Arc<dyn LicenseSource>,
    sender: Sender<MonitorEvent>,
    receiver: Receiver<MonitorEvent>,
    status_polls: PollTracker,
    license_polls: PollTracker,
    license_refresh_ticks: u64,
    stall_limit: Duration,
    ticks: u64,
    status: Option<ConnectionState>,
    license: Option<LicenseReport>,
}

impl StatusMonitor {
    pub fn new(
        status_source: Arc<dyn StatusSource>,
        license_source: Arc<dyn LicenseSource>,
        license_refresh_ticks: u64,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            status_source,
            license_source,
            sender,
            receiver,
            status_polls: PollTracker::default(),
            license_polls: PollTracker::default(),
            license_refresh_ticks: license_refresh_ticks.max(1),
            stall_limit: DEFAULT_STALL_LIMIT,
            ticks: 0,
            status: None,
            license: None,
        }
    }

    /// Starts the polls due this tick. A poll still running from an earlier
    /// tick is not doubled up; returns whether a status poll was started.
    pub fn tick(&mut self) -> bool {
        let license_due = self.ticks % self.license_refresh_ticks == 0;
        self.ticks += 1;

        if license_due {
            self.start_license_poll();
        }

        let Some(generation) = self.status_polls.start(Instant::now(), self.stall_limit) else {
            log::debug!("[monitor] status poll still running, skipping tick");
            return false;
        };

        let source = Arc::clone(&self.status_source);
        let sender = self.sender.clone();
        std::thread::spawn(move || {
            let state = source.current_status();
            let _ = sender.send(MonitorEvent::Status { generation, state });
        });
        true
    }

    fn start_license_poll(&mut self) {
        let Some(generation) = self.license_polls.start(Instant::now(), self.stall_limit) else {
            return;
        };

        let source = Arc::clone(&self.license_source);
        let sender = self.sender.clone();
        std::thread::spawn(move || {
            let report = source.license();
            let _ = sender.send(MonitorEvent::License { generation, report });
        });
    }

    fn apply(&mut self, event: MonitorEvent) -> Option<MonitorUpdate> {
        match event {
            MonitorEvent::Status { generation, state } => {
                if !self.status_polls.finish(generation) {
                    log::debug!("[monitor] discarding stale status #{generation}");
                    return None;
                }
                if self.status.as_ref() == Some(&state) {
                    return None;
                }
                log::info!("[monitor] status: {state}");
                self.status = Some(state.clone());
                Some(MonitorUpdate::Status(state))
            }
            MonitorEvent::License { generation, report } => {
                if !self.license_polls.finish(generation) {
                    log::debug!("[monitor] discarding stale license #{generation}");
                    return None;
                }
                if self.license.as_ref() == Some(&report) {
                    return None;
                }
                self.license = Some(report.clone());
                Some(MonitorUpdate::License(report))
            }
        }
    }

    /// Applies poll results as they arrive until `deadline`.
    pub fn pump_until(&mut self, deadline: Instant) -> Vec<MonitorUpdate> {
        let mut updates = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(event) => updates.extend(self.apply(event)),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        updates
    }

    /// Ticks every `interval` and hands each change to `on_update` until it
    /// returns false.
    pub fn run(&mut self, interval: Duration, mut on_update: impl FnMut(&MonitorUpdate) -> bool) {
        log::info!("[monitor] polling every {}s", interval.as_secs());
        loop {
            let deadline = Instant::now() + interval;
            self.tick();
            for update in self.pump_until(deadline) {
                if !on_update(&update) {
                    return;
                }
            }
        }
    }
}
