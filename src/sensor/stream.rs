//! Streaming shots and the outstanding-frame count.

use crate::daemon::RequestSource;
use crate::shot::Shot;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Inner {
    shots: Vec<Shot>,
    pending: usize,
}

/// Shared between the sensor and its setter thread under one lock.
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    inner: Mutex<Inner>,
}

impl StreamState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_shots(&self, shots: Vec<Shot>) {
        self.inner.lock().shots = shots;
    }

    pub(crate) fn clear_shots(&self) {
        self.inner.lock().shots.clear();
    }

    pub(crate) fn is_streaming(&self) -> bool {
        !self.inner.lock().shots.is_empty()
    }

    pub(crate) fn add_pending(&self, count: usize) {
        self.inner.lock().pending += count;
    }

    pub(crate) fn remove_pending(&self, count: usize) {
        let mut inner = self.inner.lock();
        inner.pending = inner.pending.saturating_sub(count);
    }

    pub(crate) fn reset_pending(&self) {
        self.inner.lock().pending = 0;
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.lock().pending
    }
}

impl RequestSource for StreamState {
    fn generate(&self) -> Vec<Shot> {
        let mut inner = self.inner.lock();
        inner.pending += inner.shots.len();
        inner.shots.clone()
    }

    fn discarded(&self, count: usize) {
        self.remove_pending(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_counts_pending_and_keeps_ids() {
        let state = StreamState::new();
        assert!(state.generate().is_empty());

        let shot = Shot::new();
        state.set_shots(vec![shot.clone(), Shot::new()]);
        let generated = state.generate();
        assert_eq!(generated.len(), 2);
        assert_eq!(generated[0].id(), shot.id());
        assert_eq!(state.pending(), 2);

        state.discarded(5);
        assert_eq!(state.pending(), 0);
    }
}
