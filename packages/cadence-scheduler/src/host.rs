use crate::task::TimeMillis;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};

/// Host's answer to "is the user trying to interact right now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    Idle,
    /// Continuous input only (pointer move, scroll).
    ContinuousPending,
    /// A discrete event (click, keypress) is waiting.
    DiscretePending,
}

/// The two host primitives the scheduler is built on, plus an optional input
/// hint. Implementations exist per environment; the scheduler depends only on
/// this capability.
///
/// `request_host_callback` must behave like a macrotask: the host delivers it
/// on a later turn, after it has had a chance to paint and pump events. On
/// delivery the host calls `Scheduler::on_host_callback`. The timer slot
/// holds at most one timer; arming it again replaces the previous one, and
/// delivery goes to `Scheduler::on_host_timeout`.
pub trait Host {
    /// Post a zero-delay self-message asking for a work-loop continuation.
    fn request_host_callback(&self);

    /// Arm the single timer slot to fire after `delay` milliseconds.
    fn request_host_timeout(&self, delay: TimeMillis);

    /// Disarm the timer slot.
    fn cancel_host_timeout(&self);

    /// Input-pending hint. `None` means the host cannot report one and the
    /// yield policy falls back to the plain time budget.
    fn input_status(&self) -> Option<InputStatus> {
        None
    }
}

/// Everything a `ManualHost` was asked to do, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRequest {
    Callback,
    Timeout(TimeMillis),
    CancelTimeout,
}

/// A host with no event loop of its own: it records what the scheduler asks
/// for and relies on the caller to deliver. Tests pump it against a
/// `ManualClock`; the native demo pumps it against the real clock, sleeping
/// out timer delays.
///
/// Keeps the single-slot timer contract: arming overwrites, cancelling
/// clears.
#[derive(Default)]
pub struct ManualHost {
    pending_callbacks: Cell<u32>,
    armed_timeout: Cell<Option<TimeMillis>>,
    input: Cell<Option<InputStatus>>,
    log: RefCell<SmallVec<[HostRequest; 8]>>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one pending self-message, if any. Drive the scheduler by
    /// calling `on_host_callback` for every `true`.
    pub fn take_callback_request(&self) -> bool {
        let pending = self.pending_callbacks.get();
        if pending == 0 {
            return false;
        }
        self.pending_callbacks.set(pending - 1);
        true
    }

    /// Self-messages posted but not yet delivered.
    pub fn pending_callbacks(&self) -> u32 {
        self.pending_callbacks.get()
    }

    /// Currently armed timer delay, without consuming it.
    pub fn armed_timeout(&self) -> Option<TimeMillis> {
        self.armed_timeout.get()
    }

    /// Consume the armed timer. The caller is responsible for letting the
    /// delay elapse and then calling `on_host_timeout`.
    pub fn take_timeout(&self) -> Option<TimeMillis> {
        self.armed_timeout.take()
    }

    /// Script the input hint the scheduler will observe.
    pub fn set_input_status(&self, status: Option<InputStatus>) {
        self.input.set(status);
    }

    /// Full request history, for assertions on arming/cancelling behavior.
    pub fn requests(&self) -> Vec<HostRequest> {
        self.log.borrow().iter().copied().collect()
    }
}

impl Host for ManualHost {
    fn request_host_callback(&self) {
        self.pending_callbacks.set(self.pending_callbacks.get() + 1);
        self.log.borrow_mut().push(HostRequest::Callback);
    }

    fn request_host_timeout(&self, delay: TimeMillis) {
        self.armed_timeout.set(Some(delay));
        self.log.borrow_mut().push(HostRequest::Timeout(delay));
    }

    fn cancel_host_timeout(&self) {
        self.armed_timeout.set(None);
        self.log.borrow_mut().push(HostRequest::CancelTimeout);
    }

    fn input_status(&self) -> Option<InputStatus> {
        self.input.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_requests_accumulate_and_drain() {
        let host = ManualHost::new();
        assert!(!host.take_callback_request());
        host.request_host_callback();
        host.request_host_callback();
        assert!(host.take_callback_request());
        assert!(host.take_callback_request());
        assert!(!host.take_callback_request());
    }

    #[test]
    fn timer_slot_is_single() {
        let host = ManualHost::new();
        host.request_host_timeout(100);
        host.request_host_timeout(40);
        assert_eq!(host.armed_timeout(), Some(40));
        host.cancel_host_timeout();
        assert_eq!(host.armed_timeout(), None);
        assert_eq!(
            host.requests(),
            vec![
                HostRequest::Timeout(100),
                HostRequest::Timeout(40),
                HostRequest::CancelTimeout,
            ]
        );
    }
}
