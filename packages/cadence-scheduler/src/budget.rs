use crate::host::InputStatus;
use crate::task::TimeMillis;
use std::cell::Cell;

/// Default slice budget: leaves most of a 60fps-ish frame for the host.
pub const DEFAULT_FRAME_INTERVAL_MS: TimeMillis = 5;

/// Past this, continuous input (pointer moves) alone is enough to yield.
pub const CONTINUOUS_INPUT_INTERVAL_MS: TimeMillis = 50;

/// Past this, yield unconditionally no matter what the host reports.
pub const MAX_YIELD_INTERVAL_MS: TimeMillis = 300;

/// Highest frame rate `force_frame_rate` accepts.
pub const MAX_FRAME_RATE: u32 = 125;

/// Construction-time tunables for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub frame_interval_ms: TimeMillis,
    pub continuous_input_interval_ms: TimeMillis,
    pub max_interval_ms: TimeMillis,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            continuous_input_interval_ms: CONTINUOUS_INPUT_INTERVAL_MS,
            max_interval_ms: MAX_YIELD_INTERVAL_MS,
        }
    }
}

/// Per-slice time budget and the yield decision built on it.
///
/// A slice starts when the host hands control to the work loop. While the
/// slice is under `frame_interval` the loop keeps running. Once over budget
/// the decision escalates through input-pressure tiers, ending in an
/// unconditional yield at `max_interval`.
pub struct FrameBudget {
    slice_start: Cell<TimeMillis>,
    frame_interval: Cell<TimeMillis>,
    continuous_input_interval: TimeMillis,
    max_interval: TimeMillis,
    paint_requested: Cell<bool>,
}

impl FrameBudget {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            slice_start: Cell::new(0),
            frame_interval: Cell::new(config.frame_interval_ms),
            continuous_input_interval: config.continuous_input_interval_ms,
            max_interval: config.max_interval_ms,
            paint_requested: Cell::new(false),
        }
    }

    /// Mark the beginning of a host-granted slice.
    pub fn start_slice(&self, now: TimeMillis) {
        self.slice_start.set(now);
    }

    pub fn slice_start(&self) -> TimeMillis {
        self.slice_start.get()
    }

    pub fn frame_interval(&self) -> TimeMillis {
        self.frame_interval.get()
    }

    /// Record that the host wants to paint before the current slice grows long.
    pub fn request_paint(&self) {
        self.paint_requested.set(true);
    }

    /// Cleared by the host bridge after every slice.
    pub fn clear_paint_request(&self) {
        self.paint_requested.set(false);
    }

    /// Pin the slice budget to `floor(1000 / fps)` ms. `fps == 0` restores
    /// the default; out-of-range rates are logged and ignored.
    pub fn force_frame_rate(&self, fps: u32) {
        if fps > MAX_FRAME_RATE {
            tracing::error!(
                fps,
                "force_frame_rate: supported range is 0-{MAX_FRAME_RATE} fps"
            );
            return;
        }
        if fps > 0 {
            self.frame_interval.set((1_000 / fps) as TimeMillis);
        } else {
            self.frame_interval.set(DEFAULT_FRAME_INTERVAL_MS);
        }
        tracing::debug!(interval_ms = self.frame_interval.get(), "frame interval set");
    }

    /// Should the work loop hand control back to the host?
    ///
    /// `input` is the host's input-pending hint, or `None` when the host
    /// cannot report one, in which case the budget alone decides.
    pub fn should_yield(&self, now: TimeMillis, input: Option<InputStatus>) -> bool {
        let elapsed = now - self.slice_start.get();
        if elapsed < self.frame_interval.get() {
            // The slice budget is intact; keep the thread.
            return false;
        }
        let Some(status) = input else {
            return true;
        };
        if self.paint_requested.get() {
            return true;
        }
        if elapsed < self.continuous_input_interval {
            // Only a discrete event (click, keypress) interrupts this early.
            matches!(status, InputStatus::DiscretePending)
        } else if elapsed < self.max_interval {
            !matches!(status, InputStatus::Idle)
        } else {
            // The host has been starved long enough that something
            // non-cooperative is probably going on.
            true
        }
    }
}
