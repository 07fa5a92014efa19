//! Delegate callback interface (spec §6, "delegate events"): the push
//! notifications a client registers to learn about ingestion progress and
//! unit staleness without polling, fanned out on a dedicated serial queue so
//! delegate methods never run concurrently or re-enter the index (spec §9,
//! "Callback fan-out").
//!
//! Grounded on `IndexStoreDelegate` in
//! `examples/original_source/include/IndexStoreDB/Index/IndexStoreDelegate.h`:
//! the same four notifications (`processingAddedPending`,
//! `processingCompleted`, `processedStoreUnit`, `unitIsOutOfDate`), dispatched
//! here onto a background thread via a plain `mpsc` channel rather than the
//! original's `dispatch_queue_t`, the same adaptation
//! [`crate::ingest::watcher::FsEventWatcher`] makes for its own event source.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::ingest::monitor::OutOfDateTrigger;
use crate::kv::codes::IdCode;

/// Enough of a unit's identity to report alongside a processing or
/// staleness event, kept separate from [`crate::schema::unit_info::UnitInfo`]
/// so the delegate boundary doesn't leak the KV-encoded representation.
#[derive(Debug, Clone)]
pub struct StoreUnitInfo {
    pub unit_code: IdCode,
    pub unit_name: String,
}

/// Receives push notifications about ingestion progress and unit staleness
/// (spec §6). Every method has a no-op default; implement only the ones a
/// client cares about. Methods run on the dispatch queue's single
/// background thread, never concurrently and never re-entrantly, so an
/// implementation is free to assume it has the index to itself for the
/// duration of one call.
pub trait IngestDelegate: Send + Sync {
    fn processing_added_pending(&self, _n: usize) {}
    fn processing_completed(&self, _n: usize) {}
    fn processed_store_unit(&self, _unit: StoreUnitInfo) {}
    fn unit_is_out_of_date(&self, _unit: StoreUnitInfo, _trigger: OutOfDateTrigger) {}
}

enum DelegateEvent {
    ProcessingAddedPending(usize),
    ProcessingCompleted(usize),
    ProcessedStoreUnit(StoreUnitInfo),
    UnitIsOutOfDate(StoreUnitInfo, OutOfDateTrigger),
}

fn dispatch(delegate: &dyn IngestDelegate, event: DelegateEvent) {
    match event {
        DelegateEvent::ProcessingAddedPending(n) => delegate.processing_added_pending(n),
        DelegateEvent::ProcessingCompleted(n) => delegate.processing_completed(n),
        DelegateEvent::ProcessedStoreUnit(unit) => delegate.processed_store_unit(unit),
        DelegateEvent::UnitIsOutOfDate(unit, trigger) => delegate.unit_is_out_of_date(unit, trigger),
    }
}

/// Wraps an [`IngestDelegate`] with the per-index serial queue spec §9
/// requires: every event is shipped to one background thread that drains
/// them one at a time. `unitIsOutOfDate` additionally honors a `synchronous`
/// flag (spec §9, "a synchronous flag on unitIsOutOfDate bypasses the queue
/// for tests that require in-line observation") that calls straight through
/// on the caller's own thread instead of going through the channel.
pub struct DelegateQueue {
    sender: mpsc::Sender<DelegateEvent>,
    delegate: Arc<dyn IngestDelegate>,
    synchronous: bool,
    _worker: thread::JoinHandle<()>,
}

impl DelegateQueue {
    pub fn new(delegate: Arc<dyn IngestDelegate>) -> Self {
        Self::with_synchronous(delegate, false)
    }

    pub fn with_synchronous(delegate: Arc<dyn IngestDelegate>, synchronous: bool) -> Self {
        let (sender, receiver) = mpsc::channel::<DelegateEvent>();
        let worker_delegate = delegate.clone();
        let worker = thread::Builder::new()
            .name("ingest-delegate".to_string())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    dispatch(worker_delegate.as_ref(), event);
                }
            })
            .expect("failed to spawn delegate dispatch thread");
        Self { sender, delegate, synchronous, _worker: worker }
    }

    pub fn processing_added_pending(&self, n: usize) {
        let _ = self.sender.send(DelegateEvent::ProcessingAddedPending(n));
    }

    pub fn processing_completed(&self, n: usize) {
        let _ = self.sender.send(DelegateEvent::ProcessingCompleted(n));
    }

    pub fn processed_store_unit(&self, unit: StoreUnitInfo) {
        let _ = self.sender.send(DelegateEvent::ProcessedStoreUnit(unit));
    }

    pub fn unit_is_out_of_date(&self, unit: StoreUnitInfo, trigger: OutOfDateTrigger) {
        if self.synchronous {
            self.delegate.unit_is_out_of_date(unit, trigger);
        } else {
            let _ = self.sender.send(DelegateEvent::UnitIsOutOfDate(unit, trigger));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingDelegate {
        out_of_date: Mutex<Vec<(String, String)>>,
        processed: Mutex<Vec<String>>,
    }

    impl IngestDelegate for RecordingDelegate {
        fn processed_store_unit(&self, unit: StoreUnitInfo) {
            self.processed.lock().unwrap().push(unit.unit_name);
        }

        fn unit_is_out_of_date(&self, unit: StoreUnitInfo, trigger: OutOfDateTrigger) {
            self.out_of_date
                .lock()
                .unwrap()
                .push((unit.unit_name, trigger.original_file));
        }
    }

    fn trigger(original_file: &str) -> OutOfDateTrigger {
        OutOfDateTrigger {
            original_file: original_file.to_string(),
            description: original_file.to_string(),
            out_of_date_mod_time_nanos: 42,
        }
    }

    #[test]
    fn synchronous_flag_delivers_unit_is_out_of_date_before_returning() {
        let delegate = Arc::new(RecordingDelegate::default());
        let queue = DelegateQueue::with_synchronous(delegate.clone(), true);
        queue.unit_is_out_of_date(
            StoreUnitInfo { unit_code: IdCode::from_str("u1"), unit_name: "u1".to_string() },
            trigger("/a.c"),
        );
        assert_eq!(delegate.out_of_date.lock().unwrap().as_slice(), &[("u1".to_string(), "/a.c".to_string())]);
    }

    #[test]
    fn queued_events_eventually_reach_the_delegate_in_order() {
        let delegate = Arc::new(RecordingDelegate::default());
        let queue = DelegateQueue::new(delegate.clone());
        for name in ["u1", "u2", "u3"] {
            queue.processed_store_unit(StoreUnitInfo {
                unit_code: IdCode::from_str(name),
                unit_name: name.to_string(),
            });
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while delegate.processed.lock().unwrap().len() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            delegate.processed.lock().unwrap().as_slice(),
            &["u1".to_string(), "u2".to_string(), "u3".to_string()]
        );
    }
}
