//! Progress measurement
//!
//! The streaming engine wraps the byte source in a [`MeteredStream`] that
//! counts transferred bytes into a shared [`ProgressCounter`]. A sampler task
//! owned by the orchestrator snapshots the counter on a fixed wall-clock
//! interval and emits an immutable [`ProgressSample`] per tick, so sampling
//! overhead stays bounded regardless of transfer rate.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

// Sentinel for "length unknown"; a real total of u64::MAX is not a tileset.
const NO_LENGTH: u64 = u64::MAX;

/// One point-in-time progress measurement
///
/// A fresh value is emitted per sample; samples are never mutated after
/// emission. `bytes_transferred` is non-decreasing across consecutive samples
/// within one upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSample {
    /// Bytes handed to the storage upload so far
    pub bytes_transferred: u64,
    /// Total source length, when known
    pub total_bytes: Option<u64>,
    /// Milliseconds since the previous sample
    pub interval_millis: u64,
}

impl ProgressSample {
    /// Percentage complete, unavailable when the source length is unknown
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                self.bytes_transferred as f64 / total as f64 * 100.0
            }
        })
    }
}

#[derive(Debug)]
struct CounterInner {
    bytes: AtomicU64,
    total: AtomicU64,
}

/// Shared byte counter for one upload call
///
/// Cloned between the metered stream and the sampler task; the total may be
/// set late (a caller-supplied stream can report its length mid-transfer).
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    inner: Arc<CounterInner>,
}

impl Default for ProgressCounter {
    fn default() -> Self {
        Self {
            inner: Arc::new(CounterInner {
                bytes: AtomicU64::new(0),
                total: AtomicU64::new(NO_LENGTH),
            }),
        }
    }
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record transferred bytes
    pub fn add(&self, n: u64) {
        self.inner.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Set the total source length
    pub fn set_total(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
    }

    /// Bytes transferred so far
    pub fn bytes(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }

    /// Total source length, when known
    pub fn total(&self) -> Option<u64> {
        match self.inner.total.load(Ordering::Relaxed) {
            NO_LENGTH => None,
            total => Some(total),
        }
    }

    /// Snapshot the counter into an immutable sample
    pub fn sample(&self, interval: Duration) -> ProgressSample {
        ProgressSample {
            bytes_transferred: self.bytes(),
            total_bytes: self.total(),
            interval_millis: interval.as_millis() as u64,
        }
    }
}

/// Byte stream that counts everything it yields into a [`ProgressCounter`]
pub struct MeteredStream {
    inner: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync + Unpin>,
    counter: ProgressCounter,
}

impl MeteredStream {
    pub(crate) fn new(
        inner: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync + Unpin>,
        counter: ProgressCounter,
    ) -> Self {
        Self { inner, counter }
    }

    /// Counter shared with the sampler
    pub fn counter(&self) -> &ProgressCounter {
        &self.counter
    }

    /// Total source length, when known
    pub fn total(&self) -> Option<u64> {
        self.counter.total()
    }
}

impl Stream for MeteredStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.counter.add(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
