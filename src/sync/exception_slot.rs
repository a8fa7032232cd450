//! First-writer-wins error slot shared by concurrently failing items.

use std::sync::Mutex;

use crate::error::TaskError;

/// Holds at most one [`TaskError`]; later records are discarded.
///
/// Read it only after every recorder is known to have finished (typically
/// after the call's [`Latch`](super::Latch) released).
#[derive(Debug, Default)]
pub struct ExceptionSlot {
    slot: Mutex<Option<TaskError>>,
}

impl ExceptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `err` unless an error is already held. Returns whether it was kept.
    pub fn record(&self, err: TaskError) -> bool {
        let mut guard = self.slot.lock().expect("exception slot poisoned");
        if guard.is_some() {
            return false;
        }
        *guard = Some(err);
        true
    }

    pub fn has_exception(&self) -> bool {
        self.slot.lock().expect("exception slot poisoned").is_some()
    }

    pub fn take(&self) -> Option<TaskError> {
        self.slot.lock().expect("exception slot poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_record_wins() {
        let slot = ExceptionSlot::new();
        assert!(!slot.has_exception());
        assert!(slot.record(TaskError::new(ErrorKind::NoSuccess, "first")));
        assert!(!slot.record(TaskError::new(ErrorKind::NoSuccess, "second")));
        assert!(slot.has_exception());

        let err = slot.take().unwrap();
        assert_eq!(err.message(), "first");
        assert!(slot.take().is_none());
    }

    #[test]
    fn concurrent_recorders_keep_exactly_one() {
        let slot = Arc::new(ExceptionSlot::new());
        let kept: usize = (0..8)
            .map(|i| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    slot.record(TaskError::new(ErrorKind::NoSuccess, format!("item {i}")))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();

        assert_eq!(kept, 1);
        assert!(slot.take().unwrap().message().starts_with("item "));
    }
}
