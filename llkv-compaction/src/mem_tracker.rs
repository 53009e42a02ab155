//! Per-worker memory accounting.

use llkv_result::{Error, Result};
use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks the memory one compaction worker holds against a fixed limit.
///
/// Consumption is reported by the owner (`set_consumption`, `consume`,
/// `release`); the tracker never measures anything itself. A limit of `0` or
/// below means unlimited.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    limit: i64,
    consumption: AtomicI64,
    peak: AtomicI64,
}

impl MemTracker {
    pub fn new(label: impl Into<String>, limit: i64) -> Self {
        Self {
            label: label.into(),
            limit,
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit
    }

    #[inline]
    pub fn has_limit(&self) -> bool {
        self.limit > 0
    }

    #[inline]
    pub fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn set_consumption(&self, bytes: i64) {
        self.consumption.store(bytes, Ordering::Relaxed);
        self.peak.fetch_max(bytes, Ordering::Relaxed);
    }

    pub fn consume(&self, bytes: i64) {
        let now = self.consumption.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    pub fn release(&self, bytes: i64) {
        self.consumption.fetch_sub(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn limit_exceeded(&self) -> bool {
        self.has_limit() && self.consumption() > self.limit
    }

    /// Start a reservation that reports into this tracker by delta.
    pub fn reservation(&self) -> MemReservation<'_> {
        MemReservation {
            tracker: self,
            bytes: 0,
        }
    }

    /// `ResourceExceeded` when consumption is above the limit. `what` names
    /// the operation for the error message.
    pub fn check_mem_limit(&self, what: &str) -> Result<()> {
        if self.limit_exceeded() {
            return Err(Error::ResourceExceeded(format!(
                "{} memory limit exceeded while {what}: consumption {} bytes, limit {} bytes",
                self.label,
                self.consumption(),
                self.limit
            )));
        }
        Ok(())
    }
}

/// One owner's share of a [`MemTracker`].
///
/// [`MemReservation::set`] moves the tracker by the difference to the last
/// reported amount, so owners sharing a tracker add up instead of overwriting
/// each other. Whatever is still held is released on drop.
#[derive(Debug)]
pub struct MemReservation<'a> {
    tracker: &'a MemTracker,
    bytes: i64,
}

impl MemReservation<'_> {
    pub fn set(&mut self, bytes: i64) {
        let delta = bytes - self.bytes;
        if delta >= 0 {
            self.tracker.consume(delta);
        } else {
            self.tracker.release(-delta);
        }
        self.bytes = bytes;
    }

    #[inline]
    pub fn bytes(&self) -> i64 {
        self.bytes
    }
}

impl Drop for MemReservation<'_> {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_check() {
        let tracker = MemTracker::new("compaction", 100);
        tracker.consume(80);
        assert!(tracker.check_mem_limit("reading").is_ok());
        tracker.consume(30);
        assert!(matches!(
            tracker.check_mem_limit("reading"),
            Err(Error::ResourceExceeded(_))
        ));
        tracker.release(30);
        tracker.set_consumption(10);
        assert_eq!(tracker.consumption(), 10);
        assert_eq!(tracker.peak_consumption(), 110);

        let unlimited = MemTracker::new("compaction", 0);
        unlimited.consume(i64::MAX / 2);
        assert!(unlimited.check_mem_limit("reading").is_ok());
    }

    #[test]
    fn reservations_share_a_tracker() {
        let tracker = MemTracker::new("compaction worker", 100);
        let mut a = tracker.reservation();
        let mut b = tracker.reservation();
        a.set(60);
        b.set(30);
        assert_eq!(tracker.consumption(), 90);

        a.set(20);
        assert_eq!(tracker.consumption(), 50);
        b.set(90);
        assert!(tracker.check_mem_limit("merging").is_err());

        drop(b);
        assert_eq!(tracker.consumption(), 20);
        assert_eq!(a.bytes(), 20);
        drop(a);
        assert_eq!(tracker.consumption(), 0);
        assert_eq!(tracker.peak_consumption(), 110);
    }
}
