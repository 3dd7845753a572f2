//! Transfer speed and remaining-time estimation.
//!
//! Instead of a moving average the estimator low-pass filters the byte
//! increments, which absorbs short bursts while still following sustained
//! changes of the transfer rate. `cutoff_time` (seconds) controls how much
//! history is weighted in, and also how long the estimator waits before
//! publishing a smoothed speed at all.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use super::progress::{format_duration, format_speed};

pub const DEFAULT_CUTOFF_TIME: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum EtaStatus {
    Idle,
    Paused,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtaEvent {
    Update,
    Reset,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy)]
pub struct EtaOptions {
    /// Start in `Running` state.
    pub start: bool,
    pub total: u64,
    pub cutoff_time: f64,
}

impl Default for EtaOptions {
    fn default() -> Self {
        Self {
            start: true,
            total: 0,
            cutoff_time: DEFAULT_CUTOFF_TIME,
        }
    }
}

/// Point-in-time copy of an [`Eta`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaSnapshot {
    pub status: EtaStatus,
    pub done: u64,
    pub total: u64,
    /// Percentage, two decimals.
    pub progress: f64,
    /// Bytes per second, once enough history was collected.
    pub speed: Option<u64>,
    /// Seconds left, `None` while unknown.
    pub eta: Option<u64>,
}

pub struct Eta {
    status: EtaStatus,
    done: u64,
    total: u64,
    cutoff_time: f64,
    last_update: Option<Instant>,
    /// Seconds spent in `Running`, pauses excluded.
    elapsed_time: f64,
    speed: Option<u64>,
    eta: Option<u64>,
    event_tx: broadcast::Sender<EtaEvent>,
}

impl Default for Eta {
    fn default() -> Self {
        Self::new(EtaOptions::default())
    }
}

impl Eta {
    pub fn new(options: EtaOptions) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let mut eta = Self {
            status: EtaStatus::Idle,
            done: 0,
            total: options.total,
            cutoff_time: options.cutoff_time,
            last_update: None,
            elapsed_time: 0.0,
            speed: None,
            eta: None,
            event_tx,
        };

        if options.start {
            eta.resume();
        }
        eta
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EtaEvent> {
        self.event_tx.subscribe()
    }

    pub fn reset(&mut self) {
        self.status = EtaStatus::Idle;
        self.done = 0;
        self.total = 0;
        self.last_update = None;
        self.elapsed_time = 0.0;
        self.speed = None;
        self.eta = None;
        let _ = self.event_tx.send(EtaEvent::Reset);
    }

    /// Adds `done` bytes to the transferred amount.
    pub fn add(&mut self, done: u64) {
        self.update(self.done + done, None);
    }

    /// Sets the cumulative transferred amount and, optionally, a new total.
    pub fn update(&mut self, done: u64, total: Option<u64>) {
        if self.status != EtaStatus::Running {
            return;
        }
        if let Some(total) = total.filter(|total| *total > 0) {
            self.total = total;
        }

        let now = Instant::now();
        let delta_done = done as f64 - self.done as f64;
        let delta_time = self
            .last_update
            .map(|last| now.duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        let done_before = self.done as f64;

        self.last_update = Some(now);
        self.elapsed_time += delta_time;
        self.done = done;

        let remaining = self.total.saturating_sub(done) as f64;
        if remaining <= 0.0 {
            self.eta = Some(0);
            let _ = self.event_tx.send(EtaEvent::Update);
            return;
        }

        if self.elapsed_time > self.cutoff_time {
            let alpha = delta_time / (delta_time + 1.0 / self.cutoff_time);
            let filtered = done_before + (1.0 - alpha) * delta_done;
            let speed = (filtered / self.elapsed_time).round().max(0.0);

            self.speed = Some(speed as u64);
            self.eta = if speed > 0.0 {
                Some((remaining / speed).round() as u64)
            } else {
                None
            };
        } else if self.elapsed_time > delta_time && done > 0 {
            // Very fast transfers may finish before the filter has any history.
            // Publish the average-rate estimate only once it looks plausible.
            let naive = remaining * self.elapsed_time / done as f64;
            if self.eta.is_some() || naive < 2.0 * self.cutoff_time {
                self.eta = Some(naive.round() as u64);
            }
        }

        let _ = self.event_tx.send(EtaEvent::Update);
    }

    pub fn pause(&mut self) {
        if self.status != EtaStatus::Running {
            return;
        }
        if let Some(last) = self.last_update {
            self.elapsed_time += Instant::now().duration_since(last).as_secs_f64();
        }
        self.last_update = None;
        self.status = EtaStatus::Paused;
        let _ = self.event_tx.send(EtaEvent::Pause);
    }

    pub fn resume(&mut self) {
        if self.status == EtaStatus::Running {
            return;
        }
        self.last_update = Some(Instant::now());
        self.status = EtaStatus::Running;
        let _ = self.event_tx.send(EtaEvent::Resume);
    }

    pub fn status(&self) -> EtaStatus {
        self.status
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn cutoff_time(&self) -> f64 {
        self.cutoff_time
    }

    pub fn elapsed_time(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_time)
    }

    /// 完成百分比, rounded to two decimals.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.done as f64 / self.total as f64 * 10_000.0).round() / 100.0
    }

    pub fn speed(&self) -> Option<u64> {
        self.speed
    }

    pub fn eta(&self) -> Option<u64> {
        self.eta
    }

    pub fn readable_speed(&self) -> Option<String> {
        self.speed.map(format_speed)
    }

    pub fn readable_eta(&self) -> Option<String> {
        self.eta.map(|secs| format_duration(Duration::from_secs(secs)))
    }

    pub fn snapshot(&self) -> EtaSnapshot {
        EtaSnapshot {
            status: self.status,
            done: self.done,
            total: self.total,
            progress: self.progress(),
            speed: self.speed,
            eta: self.eta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn idle(total: u64) -> Eta {
        Eta::new(EtaOptions { start: false, total, ..Default::default() })
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_ignored_until_resumed() {
        let mut eta = idle(100);
        eta.update(50, None);
        eta.add(10);
        assert_eq!(eta.status(), EtaStatus::Idle);
        assert_eq!(eta.progress(), 0.0);

        eta.resume();
        advance(Duration::from_millis(100)).await;
        eta.update(50, None);
        assert_eq!(eta.progress(), 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_rounded() {
        let mut eta = Eta::new(EtaOptions { total: 3, ..Default::default() });
        eta.add(1);
        assert_eq!(eta.progress(), 33.33);
        eta.update(2, Some(3));
        assert_eq!(eta.progress(), 66.67);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constant_rate_converges() {
        // 1 MB/s in 100 KB steps
        let mut eta = Eta::new(EtaOptions { total: 10_000_000, ..Default::default() });
        for _ in 0..40 {
            advance(Duration::from_millis(100)).await;
            eta.add(100_000);
        }

        let speed = eta.speed().unwrap() as f64;
        assert!((speed - 1_000_000.0).abs() / 1_000_000.0 < 0.01, "speed {speed}");
        assert_eq!(eta.eta(), Some(6));
        assert_eq!(eta.progress(), 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_speed_before_cutoff() {
        let mut eta = Eta::new(EtaOptions { total: 10_000_000, ..Default::default() });
        for _ in 0..20 {
            advance(Duration::from_millis(100)).await;
            eta.add(100_000);
        }
        assert_eq!(eta.speed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_very_fast_upload_gets_provisional_eta() {
        let mut eta = Eta::new(EtaOptions { total: 1000, ..Default::default() });

        advance(Duration::from_millis(100)).await;
        eta.update(100, None);
        assert_eq!(eta.eta(), None);

        advance(Duration::from_millis(100)).await;
        eta.update(200, None);
        // 800 bytes left at 1000 B/s
        assert_eq!(eta.eta(), Some(1));
        assert_eq!(eta.speed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moderate_upload_waits_for_cutoff() {
        let mut eta = Eta::new(EtaOptions { total: 10_000, ..Default::default() });

        for _ in 0..25 {
            advance(Duration::from_millis(100)).await;
            eta.add(100);
            assert_eq!(eta.eta(), None);
        }

        advance(Duration::from_millis(100)).await;
        eta.add(100);
        assert!(eta.eta().is_some());
        assert!(eta.speed().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_transfer_has_zero_eta() {
        let mut eta = Eta::new(EtaOptions { total: 100, ..Default::default() });
        advance(Duration::from_millis(100)).await;
        eta.update(100, None);
        assert_eq!(eta.eta(), Some(0));
        assert_eq!(eta.progress(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_excludes_wall_clock_time() {
        let mut eta = Eta::new(EtaOptions { total: 10_000, ..Default::default() });
        advance(Duration::from_secs(1)).await;
        eta.update(1000, None);

        eta.pause();
        assert_eq!(eta.status(), EtaStatus::Paused);
        advance(Duration::from_secs(10)).await;
        eta.update(5000, None);
        assert_eq!(eta.done(), 1000);

        eta.resume();
        advance(Duration::from_secs(1)).await;
        eta.update(2000, None);
        assert_eq!(eta.elapsed_time(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_events() {
        let mut eta = Eta::new(EtaOptions { total: 100, ..Default::default() });
        let mut events = eta.subscribe();

        advance(Duration::from_millis(100)).await;
        eta.update(10, None);
        eta.pause();
        eta.resume();
        eta.reset();

        assert_eq!(events.recv().await.unwrap(), EtaEvent::Update);
        assert_eq!(events.recv().await.unwrap(), EtaEvent::Pause);
        assert_eq!(events.recv().await.unwrap(), EtaEvent::Resume);
        assert_eq!(events.recv().await.unwrap(), EtaEvent::Reset);

        assert_eq!(eta.status(), EtaStatus::Idle);
        assert_eq!(eta.total(), 0);
        assert_eq!(eta.progress(), 0.0);
        assert_eq!(eta.eta(), None);
    }
}
