//! Fixed-interval refresh that keeps the last good snapshot.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

pub const DEFAULT_POLL_SECONDS: u64 = 30;

#[derive(Debug)]
pub struct Poller<T> {
    period: Duration,
    timer: Option<Interval>,
    latest: Option<T>,
    ticks: u64,
    failures: u64,
}

impl<T> Poller<T> {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timer: None,
            latest: None,
            ticks: 0,
            failures: 0,
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.latest.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Failed fetches since the last success.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Waits for the next tick. The first tick completes immediately.
    pub async fn next_tick(&mut self) {
        let period = self.period;
        let timer = self.timer.get_or_insert_with(|| {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        timer.tick().await;
    }

    /// Stores a fetch outcome. A failure leaves the previous snapshot in
    /// place and returns `None`.
    pub fn record<E: Display>(&mut self, outcome: Result<T, E>) -> Option<&T> {
        self.ticks += 1;
        match outcome {
            Ok(data) => {
                self.failures = 0;
                self.latest = Some(data);
                self.latest.as_ref()
            }
            Err(err) => {
                self.failures += 1;
                warn!(
                    error = %err,
                    failures = self.failures,
                    "poll failed; keeping previous data"
                );
                None
            }
        }
    }

    /// Fetches immediately and records the outcome.
    pub async fn tick<F, Fut, E>(&mut self, fetch: F) -> Option<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let outcome = fetch().await;
        self.record(outcome)
    }

    /// Fetches once per period until `max_ticks` is reached (forever when
    /// `None`), calling `on_update` after every successful fetch.
    pub async fn run<F, Fut, E, U>(&mut self, mut fetch: F, mut on_update: U, max_ticks: Option<u64>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        U: FnMut(&T),
    {
        let mut remaining = max_ticks;
        loop {
            if remaining == Some(0) {
                debug!(ticks = self.ticks, "poller finished");
                return;
            }
            self.next_tick().await;
            if let Some(data) = self.tick(&mut fetch).await {
                on_update(data);
            }
            remaining = remaining.map(|left| left - 1);
        }
    }
}
