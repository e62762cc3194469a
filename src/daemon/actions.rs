//! Action runner: fires scheduled actions at their deadlines.

use crate::clock::{Clock, Timestamp};
use crate::metrics::PipelineMetrics;
use crate::queue::PriorityQueue;
use crate::shot::Action;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An action copy with its absolute trigger time.
///
/// Ordered by trigger time; ties keep scheduling order.
#[derive(Debug)]
pub(crate) struct ScheduledAction {
    pub fire_at: Timestamp,
    pub seq: u64,
    pub action: Box<dyn Action>,
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

/// Loop executing actions in trigger-time order.
///
/// Sleeps coarsely until `spin_us` before the deadline, then busy-waits
/// the rest. After every sleep chunk the held entry is exchanged with the
/// queue head, so an earlier action scheduled meanwhile is served first.
pub(crate) struct ActionRunner {
    pub queue: Arc<PriorityQueue<ScheduledAction>>,
    pub clock: Arc<dyn Clock>,
    pub spin_us: i64,
    pub poll: Duration,
    pub stop: Arc<AtomicBool>,
    pub metrics: Arc<PipelineMetrics>,
}

impl ActionRunner {
    pub(crate) fn run(self) {
        tracing::debug!("Action runner started");
        let poll_us = (self.poll.as_micros() as i64).max(1);

        'next: while let Some(mut entry) = self.queue.pull() {
            loop {
                if self.stop.load(Ordering::Acquire) {
                    break 'next;
                }
                let remaining = entry.fire_at - self.clock.now();
                if remaining <= self.spin_us {
                    break;
                }
                let chunk = (remaining - self.spin_us).min(poll_us);
                self.clock.sleep(Duration::from_micros(chunk as u64));
                entry = self.queue.exchange(entry);
            }

            while self.clock.now() < entry.fire_at {
                self.clock.spin();
            }
            let lateness = self.clock.now() - entry.fire_at;
            entry.action.execute();
            self.metrics.action_fired(lateness);
            tracing::trace!(fire_at = %entry.fire_at, lateness_us = lateness, "Action fired");
        }
        tracing::debug!("Action runner exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::shot::FnAction;
    use parking_lot::Mutex;
    use std::thread;

    fn runner(queue: &Arc<PriorityQueue<ScheduledAction>>, clock: &Arc<ManualClock>) -> ActionRunner {
        ActionRunner {
            queue: Arc::clone(queue),
            clock: Arc::clone(clock) as Arc<dyn Clock>,
            spin_us: 500,
            poll: Duration::from_millis(10),
            stop: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(PipelineMetrics::new().unwrap()),
        }
    }

    fn recording(
        log: &Arc<Mutex<Vec<(u32, Timestamp)>>>,
        clock: &Arc<ManualClock>,
        tag: u32,
    ) -> Box<dyn Action> {
        let log = Arc::clone(log);
        let clock = Arc::clone(clock);
        Box::new(FnAction::new(0, 0, move || log.lock().push((tag, clock.now()))))
    }

    #[test]
    fn test_fires_in_deadline_order_at_deadline() {
        let clock = Arc::new(ManualClock::new(Timestamp::ZERO));
        let queue = Arc::new(PriorityQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        // Pushed latest first.
        for (tag, at) in [(3, 90_000), (1, 20_000), (2, 45_000)] {
            queue.push(ScheduledAction {
                fire_at: Timestamp::from_micros(at),
                seq: tag as u64,
                action: recording(&log, &clock, tag),
            });
        }

        let r = runner(&queue, &clock);
        let handle = thread::spawn(move || r.run());
        while log.lock().len() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        queue.close();
        handle.join().unwrap();

        let log = log.lock();
        let tags: Vec<u32> = log.iter().map(|(tag, _)| *tag).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        for ((_, at), want) in log.iter().zip([20_000, 45_000, 90_000]) {
            assert!((at.as_micros() - want).abs() <= 50, "fired at {at}, wanted {want}");
        }
    }

    #[test]
    fn test_past_due_fires_immediately() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_micros(1_000_000)));
        let queue = Arc::new(PriorityQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.push(ScheduledAction {
            fire_at: Timestamp::from_micros(10),
            seq: 0,
            action: recording(&log, &clock, 7),
        });

        let r = runner(&queue, &clock);
        let metrics = Arc::clone(&r.metrics);
        let handle = thread::spawn(move || r.run());
        while log.lock().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        queue.close();
        handle.join().unwrap();

        assert_eq!(log.lock()[0], (7, Timestamp::from_micros(1_000_000)));
        assert_eq!(metrics.snapshot().actions_fired, 1);
    }

    #[test]
    fn test_stop_discards_without_executing() {
        let clock = Arc::new(ManualClock::new(Timestamp::ZERO));
        let queue = Arc::new(PriorityQueue::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.push(ScheduledAction {
            fire_at: Timestamp::from_micros(5_000_000),
            seq: 0,
            action: recording(&log, &clock, 1),
        });

        let r = runner(&queue, &clock);
        r.stop.store(true, Ordering::Release);
        r.run();
        assert!(log.lock().is_empty());
    }
}
