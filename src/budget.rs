use std::sync::atomic::{AtomicI64, Ordering};

use codeintel_worker_handler::PreDequeue;
use codeintel_worker_record::Upload;
use prometheus::Gauge;
use tracing::trace;

use crate::store::UploadCondition;

/// Soft limit on the combined size of uploads processed concurrently.
///
/// Admission is optimistic: the remaining budget is read when choosing the
/// dequeue predicate and only decremented once the record is leased, so two
/// slots may briefly admit more than the budget between those two points.
pub struct UploadBudget {
    remaining: AtomicI64,
    max: i64,
    in_flight_bytes: Option<Gauge>,
}

impl UploadBudget {
    /// A budget of `max` bytes. A value of zero or less disables the limit.
    pub fn new(max: i64) -> Self {
        UploadBudget {
            remaining: AtomicI64::new(max),
            max,
            in_flight_bytes: None,
        }
    }

    /// Mirrors the uncompressed size of admitted uploads into `gauge`.
    pub fn with_gauge(mut self, gauge: Gauge) -> Self {
        self.in_flight_bytes = Some(gauge);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max > 0
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// Picks the dequeue predicate for the next slot.
    ///
    /// Skips the dequeue entirely once the budget is exhausted.
    pub fn pre_dequeue(&self) -> PreDequeue<UploadCondition> {
        if !self.is_enabled() {
            return PreDequeue::Dequeue(vec![]);
        }

        let remaining = self.remaining();
        if remaining <= 0 {
            trace!(remaining, "Upload budget exhausted, skipping dequeue");
            return PreDequeue::Skip;
        }

        PreDequeue::Dequeue(vec![UploadCondition::MaxUploadSize(remaining)])
    }

    /// Charges the gzipped size of `upload` to the budget.
    pub fn admit(&self, upload: &Upload) {
        if let Some(gauge) = &self.in_flight_bytes {
            gauge.add(upload.uncompressed_size().unwrap_or(0) as f64);
        }
        self.remaining
            .fetch_sub(upload.upload_size().unwrap_or(0), Ordering::SeqCst);
    }

    /// Returns what [`UploadBudget::admit`] charged.
    pub fn release(&self, upload: &Upload) {
        if let Some(gauge) = &self.in_flight_bytes {
            gauge.sub(upload.uncompressed_size().unwrap_or(0) as f64);
        }
        self.remaining
            .fetch_add(upload.upload_size().unwrap_or(0), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(id: i64, size: Option<i64>) -> Upload {
        let builder = Upload::builder().id(id);
        match size {
            Some(size) => builder.upload_size(size).build(),
            None => builder.build(),
        }
    }

    #[test]
    fn test_disabled_budget_never_restricts() {
        let budget = UploadBudget::new(0);
        assert_eq!(budget.pre_dequeue(), PreDequeue::Dequeue(vec![]));

        budget.admit(&upload(1, Some(10_000)));
        assert_eq!(budget.pre_dequeue(), PreDequeue::Dequeue(vec![]));
        assert_eq!(budget.remaining(), -10_000);
    }

    #[test]
    fn test_predicate_tracks_remaining_budget() {
        let budget = UploadBudget::new(2000);
        assert_eq!(
            budget.pre_dequeue(),
            PreDequeue::Dequeue(vec![UploadCondition::MaxUploadSize(2000)])
        );

        let a = upload(1, Some(1500));
        budget.admit(&a);
        assert_eq!(
            budget.pre_dequeue(),
            PreDequeue::Dequeue(vec![UploadCondition::MaxUploadSize(500)])
        );

        let b = upload(2, Some(500));
        budget.admit(&b);
        assert_eq!(budget.pre_dequeue(), PreDequeue::Skip);

        budget.release(&a);
        budget.release(&b);
        assert_eq!(budget.remaining(), 2000);
    }

    #[test]
    fn test_unknown_size_counts_as_zero() {
        let budget = UploadBudget::new(100);
        let u = upload(1, None);
        budget.admit(&u);
        assert_eq!(budget.remaining(), 100);
        budget.release(&u);
        assert_eq!(budget.remaining(), 100);
    }

    #[test]
    fn test_gauge_mirrors_admitted_bytes() {
        let gauge = Gauge::new("test_upload_size", "test").unwrap();
        let budget = UploadBudget::new(0).with_gauge(gauge.clone());

        let u = Upload::builder()
            .id(1)
            .upload_size(300)
            .uncompressed_size(4200)
            .build();
        budget.admit(&u);
        assert_eq!(gauge.get(), 4200.0);
        budget.release(&u);
        assert_eq!(gauge.get(), 0.0);
    }
}
