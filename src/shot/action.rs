//! Timed side effects attached to a shot.

use std::fmt;
use std::sync::Arc;

/// Something that must happen at a precise moment relative to exposure.
///
/// The pipeline schedules `execute` at
/// `exposure_start + time() - latency()`, so the physical effect lands at
/// `time()` microseconds after the exposure begins. Actions are cloned
/// into the pipeline when a shot is submitted, so the caller's shot can
/// be reused or dropped straight away.
pub trait Action: Send + Sync + fmt::Debug {
    /// Offset from exposure start at which the effect should occur, in µs.
    fn time(&self) -> i64;

    /// Time the effect needs between triggering and occurring, in µs.
    fn latency(&self) -> i64 {
        0
    }

    /// Performs the effect. Called exactly once per scheduled copy.
    fn execute(&self);

    /// Clones into a new box.
    fn box_clone(&self) -> Box<dyn Action>;
}

impl Clone for Box<dyn Action> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Action running an arbitrary closure.
///
/// Useful for effects without a dedicated device type, such as a
/// shutter sound or a trigger pulse.
#[derive(Clone)]
pub struct FnAction {
    time: i64,
    latency: i64,
    effect: Arc<dyn Fn() + Send + Sync>,
}

impl FnAction {
    /// Runs `effect` at `time` µs into the exposure; it needs `latency` µs to take hold.
    pub fn new(time: i64, latency: i64, effect: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            time,
            latency,
            effect: Arc::new(effect),
        }
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction")
            .field("time", &self.time)
            .field("latency", &self.latency)
            .finish()
    }
}

impl Action for FnAction {
    fn time(&self) -> i64 {
        self.time
    }

    fn latency(&self) -> i64 {
        self.latency
    }

    fn execute(&self) {
        (self.effect)();
    }

    fn box_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_boxed_clone_shares_effect() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let action: Box<dyn Action> = Box::new(FnAction::new(100, 20, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let copy = action.clone();
        assert_eq!(copy.time(), 100);
        assert_eq!(copy.latency(), 20);
        action.execute();
        copy.execute();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
