//! Counters and confirm latencies of a benchmark run.
//!
//! The [`Recorder`] is created by `main` and handed to the harness, listeners get clones of it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use hdrhistogram::Histogram;
use log::info;
use serde_derive::Serialize;

#[derive(Clone)]
pub(crate) struct Recorder {
    inner: Arc<Mutex<Stats>>,
}

struct Stats {
    /// Confirm or round trip latencies in microseconds.
    latencies: Histogram<u64>,
    messages: u64,
    bytes: u64,
    confirms: u64,
    nacks: u64,
    returns: u64,
    received: u64,
    started: Option<Instant>,
    finished: Option<Instant>,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct Report {
    pub(crate) command: String,
    pub(crate) implementation: String,
    pub(crate) messages: u64,
    pub(crate) bytes: u64,
    pub(crate) elapsed_ms: f64,
    pub(crate) msgs_per_sec: f64,
    pub(crate) mb_per_sec: f64,
    pub(crate) confirms: u64,
    pub(crate) nacks: u64,
    pub(crate) returns: u64,
    pub(crate) received: u64,
    pub(crate) latency: Option<Latency>,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct Latency {
    pub(crate) samples: u64,
    pub(crate) p50_us: u64,
    pub(crate) p95_us: u64,
    pub(crate) p99_us: u64,
    pub(crate) max_us: u64,
}

impl Recorder {
    pub(crate) fn new() -> Result<Self> {
        let latencies = Histogram::<u64>::new(3)?;

        Ok(Recorder {
            inner: Arc::new(Mutex::new(Stats {
                latencies,
                messages: 0,
                bytes: 0,
                confirms: 0,
                nacks: 0,
                returns: 0,
                received: 0,
                started: None,
                finished: None,
            })),
        })
    }

    pub(crate) fn start(&self) {
        self.inner.lock().unwrap().started = Some(Instant::now());
    }

    pub(crate) fn finish(&self) {
        self.inner.lock().unwrap().finished = Some(Instant::now());
    }

    pub(crate) fn published(&self, size: usize) {
        let mut stats = self.inner.lock().unwrap();

        stats.messages += 1;
        stats.bytes += size as u64;
    }

    pub(crate) fn confirmed(&self, latency: Duration) {
        let mut stats = self.inner.lock().unwrap();

        stats.confirms += 1;
        stats.latencies.saturating_record(latency.as_micros() as u64);
    }

    pub(crate) fn nacked(&self) {
        self.inner.lock().unwrap().nacks += 1;
    }

    pub(crate) fn returned(&self) {
        self.inner.lock().unwrap().returns += 1;
    }

    /// A message consumed back, with the time since it was published.
    pub(crate) fn received(&self, round_trip: Duration) {
        let mut stats = self.inner.lock().unwrap();

        stats.received += 1;
        stats.latencies.saturating_record(round_trip.as_micros() as u64);
    }

    pub(crate) fn confirms(&self) -> u64 {
        self.inner.lock().unwrap().confirms
    }

    pub(crate) fn nacks(&self) -> u64 {
        self.inner.lock().unwrap().nacks
    }

    pub(crate) fn returns(&self) -> u64 {
        self.inner.lock().unwrap().returns
    }

    pub(crate) fn report(&self, command: &str, implementation: &str) -> Report {
        let stats = self.inner.lock().unwrap();

        let elapsed = match (stats.started, stats.finished) {
            (Some(started), Some(finished)) => finished.duration_since(started),
            (Some(started), None) => started.elapsed(),
            _ => Duration::ZERO,
        };
        let secs = elapsed.as_secs_f64();

        let (msgs_per_sec, mb_per_sec) = if secs > 0.0 {
            (
                stats.messages as f64 / secs,
                stats.bytes as f64 / (1024.0 * 1024.0) / secs,
            )
        } else {
            (0.0, 0.0)
        };

        let latency = if stats.latencies.is_empty() {
            None
        } else {
            Some(Latency {
                samples: stats.latencies.len(),
                p50_us: stats.latencies.value_at_quantile(0.50),
                p95_us: stats.latencies.value_at_quantile(0.95),
                p99_us: stats.latencies.value_at_quantile(0.99),
                max_us: stats.latencies.max(),
            })
        };

        Report {
            command: command.to_string(),
            implementation: implementation.to_string(),
            messages: stats.messages,
            bytes: stats.bytes,
            elapsed_ms: secs * 1000.0,
            msgs_per_sec,
            mb_per_sec,
            confirms: stats.confirms,
            nacks: stats.nacks,
            returns: stats.returns,
            received: stats.received,
            latency,
        }
    }
}

impl Report {
    pub(crate) fn log(&self) {
        info!(
            "{} via {}: {} messages, {} bytes in {:.1} ms",
            self.command, self.implementation, self.messages, self.bytes, self.elapsed_ms
        );
        info!("Throughput {:.0} msg/s, {:.2} MB/s", self.msgs_per_sec, self.mb_per_sec);
        info!(
            "Confirms {}, nacks {}, returns {}, received {}",
            self.confirms, self.nacks, self.returns, self.received
        );

        if let Some(latency) = &self.latency {
            info!(
                "Latency of {} samples: p50 {} us, p95 {} us, p99 {} us, max {} us",
                latency.samples, latency.p50_us, latency.p95_us, latency.p99_us, latency.max_us
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_percentiles() {
        let recorder = Recorder::new().unwrap();

        recorder.start();

        for ms in 1..=100 {
            recorder.published(1024);
            recorder.confirmed(Duration::from_millis(ms));
        }

        recorder.nacked();
        recorder.returned();
        recorder.finish();

        let report = recorder.report("publish", "blocking");

        assert_eq!(report.messages, 100);
        assert_eq!(report.bytes, 102_400);
        assert_eq!(report.confirms, 100);
        assert_eq!(report.nacks, 1);
        assert_eq!(report.returns, 1);

        let latency = report.latency.unwrap();

        assert_eq!(latency.samples, 100);
        // three significant digits
        assert!((49_900..=50_100).contains(&latency.p50_us));
        assert!((98_900..=99_100).contains(&latency.p99_us));
        assert!((99_900..=100_100).contains(&latency.max_us));
    }

    #[test]
    fn no_latency_without_samples() {
        let recorder = Recorder::new().unwrap();

        recorder.published(10);

        let report = recorder.report("publish", "select");

        assert!(report.latency.is_none());
        assert_eq!(report.elapsed_ms, 0.0);
        assert_eq!(report.msgs_per_sec, 0.0);
    }

    #[test]
    fn json_report() {
        let recorder = Recorder::new().unwrap();

        recorder.start();
        recorder.published(5);
        recorder.received(Duration::from_micros(250));
        recorder.finish();

        let json: serde_json::Value =
            serde_json::to_value(recorder.report("altpubcons", "select")).unwrap();

        assert_eq!(json["command"], "altpubcons");
        assert_eq!(json["implementation"], "select");
        assert_eq!(json["messages"], 1);
        assert_eq!(json["received"], 1);
        assert_eq!(json["latency"]["samples"], 1);
    }
}
