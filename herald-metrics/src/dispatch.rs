//! Dispatch engine metrics
//!
//! Tracks:
//! - Batch outcomes and the attempts each one took
//! - Job outcomes by final status
//! - Send latency
//! - Queue length and batches currently in flight
//! - Recovery resets

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

use crate::MetricsError;

/// Dispatch metrics collector
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Total number of batches settled, by outcome
    batches_total: Counter<u64>,

    /// Distribution of send attempts per settled batch
    send_attempts: Histogram<u64>,

    /// Distribution of batch send durations, retries included
    send_duration_seconds: Histogram<f64>,

    /// Total number of jobs finished, by final status
    jobs_total: Counter<u64>,

    /// Total number of records reset by the recovery scheduler, by kind
    recovery_resets_total: Counter<u64>,

    /// Audit events that never reached the writer
    audit_dropped_total: Counter<u64>,

    // Shared with the observable gauge callbacks
    queue_length: Arc<AtomicU64>,
    batches_in_flight: Arc<AtomicU64>,

    // Local tallies so callers can read back what was recorded
    sent_count: AtomicU64,
    failed_count: AtomicU64,
}

impl DispatchMetrics {
    /// Create a new dispatch metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let batches_total = meter
            .u64_counter("herald.dispatch.batches.total")
            .with_description("Total number of batches settled, by outcome")
            .build();

        let send_attempts = meter
            .u64_histogram("herald.dispatch.send.attempts")
            .with_description("Distribution of send attempts per settled batch")
            .build();

        let send_duration_seconds = meter
            .f64_histogram("herald.dispatch.send.duration.seconds")
            .with_description("Distribution of batch send durations, retries included")
            .build();

        let jobs_total = meter
            .u64_counter("herald.dispatch.jobs.total")
            .with_description("Total number of jobs finished, by final status")
            .build();

        let recovery_resets_total = meter
            .u64_counter("herald.dispatch.recovery.resets.total")
            .with_description("Total number of records reset by recovery, by kind")
            .build();

        let audit_dropped_total = meter
            .u64_counter("herald.dispatch.audit.dropped.total")
            .with_description("Audit events dropped before reaching the store")
            .build();

        let queue_length = Arc::new(AtomicU64::new(0));
        let batches_in_flight = Arc::new(AtomicU64::new(0));

        let queued = queue_length.clone();
        meter
            .u64_observable_gauge("herald.dispatch.queue.length")
            .with_description("Jobs waiting in the in-process queue")
            .with_callback(move |observer| {
                observer.observe(queued.load(Ordering::Relaxed), &[]);
            })
            .build();

        let in_flight = batches_in_flight.clone();
        meter
            .u64_observable_gauge("herald.dispatch.batches.in_flight")
            .with_description("Batches currently being sent by this process")
            .with_callback(move |observer| {
                observer.observe(in_flight.load(Ordering::Relaxed), &[]);
            })
            .build();

        Ok(Self {
            batches_total,
            send_attempts,
            send_duration_seconds,
            jobs_total,
            recovery_resets_total,
            audit_dropped_total,
            queue_length,
            batches_in_flight,
            sent_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
        })
    }

    /// Record a batch that was accepted by the transport
    pub fn record_batch_sent(&self, attempts: u32, duration_secs: f64) {
        self.batches_total
            .add(1, &[KeyValue::new("outcome", "sent")]);
        self.send_attempts.record(u64::from(attempts), &[]);
        self.send_duration_seconds.record(duration_secs, &[]);
        self.sent_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch that ended in FAILED
    pub fn record_batch_failed(&self, attempts: u32, code: &str) {
        self.batches_total.add(
            1,
            &[
                KeyValue::new("outcome", "failed"),
                KeyValue::new("code", code.to_string()),
            ],
        );
        self.send_attempts.record(u64::from(attempts), &[]);
        self.failed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job reaching its final status
    pub fn record_job_finished(&self, status: &str) {
        self.jobs_total
            .add(1, &[KeyValue::new("status", status.to_string())]);
    }

    /// Record records reset by a recovery pass
    pub fn record_recovery(&self, kind: &'static str, count: u64) {
        if count > 0 {
            self.recovery_resets_total
                .add(count, &[KeyValue::new("kind", kind)]);
        }
    }

    pub fn record_audit_dropped(&self) {
        self.audit_dropped_total.add(1, &[]);
    }

    /// Set the current queue length
    pub fn set_queue_length(&self, length: u64) {
        self.queue_length.store(length, Ordering::Relaxed);
    }

    #[must_use]
    pub fn queue_length(&self) -> u64 {
        self.queue_length.load(Ordering::Relaxed)
    }

    pub fn batch_started(&self) {
        self.batches_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_finished(&self) {
        // Never wraps below zero on an unmatched call
        let _ = self
            .batches_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    #[must_use]
    pub fn batches_in_flight(&self) -> u64 {
        self.batches_in_flight.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn batches_sent(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn batches_failed(&self) -> u64 {
        self.failed_count.load(Ordering::Relaxed)
    }
}

/// Get the OpenTelemetry meter for dispatch metrics
fn meter() -> Meter {
    opentelemetry::global::meter("herald.dispatch")
}
