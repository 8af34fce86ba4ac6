use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::Frame;

#[derive(Debug, Default)]
struct Slot {
    frame: Option<(u64, Arc<Frame>)>,
    closed: bool,
}

/// Single-slot handoff between the frame source and the worker.
///
/// The slot stays occupied while its frame is being processed, so a frame offered in
/// that window is dropped instead of queued. The crop step reads its buffer back from
/// the same slot, which guarantees it sees the frame the detections were made on.
#[derive(Debug, Default)]
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `frame` if the slot is free. Returns `false` when it was dropped.
    pub fn offer(&self, sequence: u64, frame: Arc<Frame>) -> bool {
        let mut slot = self.lock();
        if slot.closed || slot.frame.is_some() {
            return false;
        }
        slot.frame = Some((sequence, frame));
        self.ready.notify_one();
        true
    }

    /// Blocks until a frame is available. `None` once the mailbox is closed.
    pub fn wait(&self) -> Option<(u64, Arc<Frame>)> {
        let slot = self.lock();
        let slot = self
            .ready
            .wait_while(slot, |slot| !slot.closed && slot.frame.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if slot.closed {
            return None;
        }
        slot.frame.clone()
    }

    /// The buffer in the slot, provided it still belongs to `sequence`.
    pub fn buffer_for(&self, sequence: u64) -> Option<Arc<Frame>> {
        match &self.lock().frame {
            Some((current, frame)) if *current == sequence => Some(frame.clone()),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock().frame.is_some()
    }

    /// Frees the slot if it still holds `sequence`.
    pub fn release(&self, sequence: u64) {
        let mut slot = self.lock();
        if matches!(slot.frame, Some((current, _)) if current == sequence) {
            slot.frame = None;
        }
    }

    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.frame = None;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
