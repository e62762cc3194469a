//! Optional real-time scheduling for the pipeline threads.

use std::io;

/// Which pipeline thread is asking; decides its relative priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadRole {
    Actions,
    Setter,
    Handler,
}

impl ThreadRole {
    /// Steps below the maximum FIFO priority.
    fn rank(self) -> i32 {
        match self {
            ThreadRole::Actions => 0,
            ThreadRole::Setter => 1,
            ThreadRole::Handler => 2,
        }
    }
}

/// Moves the calling thread to SCHED_FIFO. Failure (usually missing
/// privileges) is logged and otherwise ignored.
pub(crate) fn promote_current_thread(role: ThreadRole) {
    match set_fifo(role.rank()) {
        Ok(priority) => tracing::debug!(?role, priority, "Real-time priority set"),
        Err(e) => tracing::warn!(?role, error = %e, "Could not set real-time priority"),
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_fifo(steps_below_max: i32) -> io::Result<i32> {
    // SAFETY: plain libc calls on the current thread with a valid,
    // fully initialised sched_param.
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max < 0 {
            return Err(io::Error::last_os_error());
        }
        let priority = (max - steps_below_max).max(1);
        let param = libc::sched_param {
            sched_priority: priority,
        };
        match libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) {
            0 => Ok(priority),
            rc => Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn set_fifo(_steps_below_max: i32) -> io::Result<i32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "real-time scheduling is only supported on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_runner_ranks_highest() {
        assert!(ThreadRole::Actions.rank() < ThreadRole::Setter.rank());
        assert!(ThreadRole::Setter.rank() < ThreadRole::Handler.rank());
    }

    #[test]
    fn test_promotion_never_panics() {
        std::thread::spawn(|| promote_current_thread(ThreadRole::Handler))
            .join()
            .unwrap();
    }
}
