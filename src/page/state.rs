use parking_lot::Mutex;
use std::collections::HashMap;

use super::ImageId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageProcessingState {
    pub processing: bool,
    pub processed: bool,
}

/// Per-image idempotency flags, kept outside the page's own objects.
#[derive(Debug, Default)]
pub struct ImageStateTable {
    states: Mutex<HashMap<ImageId, ImageProcessingState>>,
}

impl ImageStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the image for processing unless it is already in flight or done.
    ///
    /// The returned guard clears `processing` when dropped and sets
    /// `processed` only if [`ProcessingGuard::succeed`] was called.
    pub fn try_begin(&self, id: &ImageId) -> Option<ProcessingGuard<'_>> {
        let mut states = self.states.lock();
        let state = states.entry(id.clone()).or_default();
        if state.processing || state.processed {
            return None;
        }
        state.processing = true;
        Some(ProcessingGuard {
            table: self,
            id: id.clone(),
            succeeded: false,
        })
    }

    pub fn state(&self, id: &ImageId) -> ImageProcessingState {
        self.states.lock().get(id).copied().unwrap_or_default()
    }

    /// Forgets every image that is not currently in flight.
    pub fn reset(&self) {
        self.states.lock().retain(|_, state| state.processing);
    }

    fn finish(&self, id: &ImageId, succeeded: bool) {
        let mut states = self.states.lock();
        let state = states.entry(id.clone()).or_default();
        state.processing = false;
        state.processed = succeeded;
    }
}

pub struct ProcessingGuard<'a> {
    table: &'a ImageStateTable,
    id: ImageId,
    succeeded: bool,
}

impl ProcessingGuard<'_> {
    pub fn succeed(mut self) {
        self.succeeded = true;
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.table.finish(&self.id, self.succeeded);
    }
}
