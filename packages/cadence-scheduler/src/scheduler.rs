use crate::budget::{FrameBudget, SchedulerConfig};
use crate::clock::Clock;
use crate::host::Host;
use crate::queue::TaskQueue;
use crate::task::{Continuation, Priority, Task, TaskFn, TaskHandle, TimeMillis};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, trace};

/// Options accepted by `schedule_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleOptions {
    /// Milliseconds to hold the task in the delayed queue before it becomes
    /// eligible. Values `<= 0` mean "eligible now".
    pub delay: TimeMillis,
}

/// Cooperative, priority-based task scheduler.
///
/// Callbacks are tagged with a [`Priority`], which fixes their deadline, and
/// run strictly in deadline order on the submitting thread. The work loop
/// drains tasks until the frame budget runs out, then returns to the host so
/// it can paint and pump events; the host grants the next slice through its
/// self-message primitive. Delayed tasks wait in a second queue keyed by
/// start time and migrate into the ready queue when their time arrives.
///
/// All state lives on one thread behind `Cell`/`RefCell`; callbacks may
/// reentrantly schedule, cancel, pause, or query the scheduler, but the work
/// loop itself is never entered recursively.
pub struct Scheduler<H: Host> {
    host: Rc<H>,
    clock: Rc<dyn Clock>,
    ready: TaskQueue,
    delayed: TaskQueue,
    budget: FrameBudget,
    next_task_id: Cell<u64>,
    current_priority: Cell<Priority>,
    performing_work: Cell<bool>,
    host_callback_scheduled: Cell<bool>,
    host_timeout_scheduled: Cell<bool>,
    paused: Cell<bool>,
}

impl<H: Host> Scheduler<H> {
    pub fn new(host: Rc<H>, clock: Rc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            host,
            clock,
            ready: TaskQueue::new(),
            delayed: TaskQueue::new(),
            budget: FrameBudget::new(config),
            next_task_id: Cell::new(1),
            current_priority: Cell::new(Priority::Normal),
            performing_work: Cell::new(false),
            host_callback_scheduled: Cell::new(false),
            host_timeout_scheduled: Cell::new(false),
            paused: Cell::new(false),
        }
    }

    pub fn host(&self) -> &Rc<H> {
        &self.host
    }

    /// Current monotonic time in milliseconds.
    pub fn now(&self) -> TimeMillis {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Schedule `callback` at `priority`, eligible immediately.
    pub fn schedule(
        &self,
        priority: Priority,
        callback: impl FnOnce(bool) -> Continuation + 'static,
    ) -> TaskHandle {
        self.schedule_with(priority, callback, ScheduleOptions::default())
    }

    /// Schedule `callback` at `priority` with explicit options.
    ///
    /// Delayed tasks go to the delayed queue; if the new task becomes the
    /// earliest delayed task while nothing is ready, the host timer is
    /// re-armed for it. Eligible tasks go straight to the ready queue and,
    /// unless a work-loop continuation is already on its way or the work
    /// loop is running right now, ask the host for one.
    pub fn schedule_with(
        &self,
        priority: Priority,
        callback: impl FnOnce(bool) -> Continuation + 'static,
        options: ScheduleOptions,
    ) -> TaskHandle {
        let current_time = self.clock.now();
        let start_time = if options.delay > 0 {
            current_time + options.delay
        } else {
            current_time
        };
        let expiration_time = start_time + priority.timeout_ms();

        let id = self.next_task_id.get();
        self.next_task_id.set(id + 1);
        let task = Rc::new(RefCell::new(Task::new(
            id,
            Box::new(callback) as TaskFn,
            priority,
            start_time,
            expiration_time,
        )));
        trace!(id, ?priority, start_time, expiration_time, "schedule");

        if start_time > current_time {
            // Not eligible yet; parked until its start time.
            task.borrow_mut().set_sort_index(start_time);
            self.delayed.push(Rc::clone(&task));
            let is_earliest = self
                .delayed
                .peek()
                .is_some_and(|head| Rc::ptr_eq(&head, &task));
            if self.ready.is_empty() && is_earliest {
                // This task is now the next thing that can happen; the
                // single timer slot must target it.
                if self.host_timeout_scheduled.get() {
                    self.host.cancel_host_timeout();
                } else {
                    self.host_timeout_scheduled.set(true);
                }
                self.host.request_host_timeout(start_time - current_time);
            }
        } else {
            {
                let mut t = task.borrow_mut();
                t.set_sort_index(expiration_time);
                t.set_queued(true);
            }
            self.ready.push(Rc::clone(&task));
            if !self.host_callback_scheduled.get() && !self.performing_work.get() {
                self.host_callback_scheduled.set(true);
                self.host.request_host_callback();
            }
        }

        task
    }

    /// Drop a task before it runs. The queue slot is reclaimed lazily when
    /// the task surfaces at the head.
    pub fn cancel(&self, handle: &TaskHandle) {
        let mut task = handle.borrow_mut();
        task.clear_callback();
        trace!(id = task.id(), "cancel");
    }

    /// The ready-queue head, if any. Does not dequeue.
    pub fn first_ready_task(&self) -> Option<TaskHandle> {
        self.ready.peek()
    }

    // ------------------------------------------------------------------
    // Ambient priority
    // ------------------------------------------------------------------

    /// Priority in effect for the code currently running.
    pub fn current_priority(&self) -> Priority {
        self.current_priority.get()
    }

    /// Run `f` with the ambient priority replaced by `priority`; the
    /// previous level is restored on every exit path, panics included.
    pub fn run_with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        let _guard = AmbientPriorityGuard::enter(&self.current_priority, priority);
        f()
    }

    /// Run `f` at Normal priority unless the ambient level is already lower
    /// than Normal, in which case the lower level is preserved.
    pub fn run_in_next_priority<R>(&self, f: impl FnOnce() -> R) -> R {
        let priority = match self.current_priority.get() {
            Priority::Immediate | Priority::UserBlocking | Priority::Normal => Priority::Normal,
            lower => lower,
        };
        self.run_with_priority(priority, f)
    }

    /// Capture the ambient priority now; every call of the returned closure
    /// runs `f` under the captured level.
    pub fn wrap_in_current_priority<R>(
        self: Rc<Self>,
        f: impl Fn() -> R + 'static,
    ) -> impl Fn() -> R {
        let captured = self.current_priority.get();
        move || self.run_with_priority(captured, &f)
    }

    // ------------------------------------------------------------------
    // Yield policy surface
    // ------------------------------------------------------------------

    /// Should the currently running callback wrap up and return a
    /// continuation? Combines the slice budget with the host's input hint.
    pub fn should_yield(&self) -> bool {
        self.budget
            .should_yield(self.clock.now(), self.host.input_status())
    }

    /// Ask the work loop to get out of the way of a paint as soon as the
    /// slice budget allows.
    pub fn request_paint(&self) {
        self.budget.request_paint();
    }

    /// Pin the slice budget to a frame rate in [0, 125] fps; 0 restores the
    /// default. Out-of-range values are logged and ignored.
    pub fn force_frame_rate(&self, fps: u32) {
        self.budget.force_frame_rate(fps);
    }

    // ------------------------------------------------------------------
    // Pause / resume
    // ------------------------------------------------------------------

    /// Stop consuming tasks at the next callback boundary. Queued work is
    /// kept; the work loop exits its drain without touching it.
    pub fn pause(&self) {
        debug!("pause");
        self.paused.set(true);
    }

    /// Clear the pause latch and, unless a continuation is already on its
    /// way or work is in flight, ask the host for one.
    pub fn resume(&self) {
        debug!("resume");
        self.paused.set(false);
        if !self.host_callback_scheduled.get() && !self.performing_work.get() {
            self.host_callback_scheduled.set(true);
            self.host.request_host_callback();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    // ------------------------------------------------------------------
    // Host entry points
    // ------------------------------------------------------------------

    /// Entry point for the host's self-message: one work-loop slice.
    ///
    /// Records the slice start, runs the work loop, and re-arms the host
    /// continuation when more work remains. Re-arming also happens if a
    /// callback panics mid-drain, so queued tasks survive a bad callback;
    /// the panic itself keeps propagating to the host. The paint request is
    /// cleared once the slice is over either way.
    pub fn on_host_callback(&self) {
        let current_time = self.clock.now();
        self.budget.start_slice(current_time);
        let has_time_remaining = true;

        let mut guard = SliceGuard {
            scheduler: self,
            rearm: true,
        };
        let has_more = self.work_loop(has_time_remaining, current_time);
        guard.rearm = has_more;
    }

    /// Entry point for the host timer: promote matured delayed tasks, then
    /// either request a work-loop continuation or re-arm the timer for the
    /// next delayed task.
    pub fn on_host_timeout(&self) {
        self.host_timeout_scheduled.set(false);
        let current_time = self.clock.now();
        self.advance_timers(current_time);

        if self.host_callback_scheduled.get() {
            return;
        }
        if !self.ready.is_empty() {
            self.host_callback_scheduled.set(true);
            self.host.request_host_callback();
        } else if let Some(head) = self.delayed.peek() {
            let start_time = head.borrow().start_time();
            self.host_timeout_scheduled.set(true);
            self.host.request_host_timeout(start_time - current_time);
        }
    }

    // ------------------------------------------------------------------
    // Work loop
    // ------------------------------------------------------------------

    fn work_loop(&self, has_time_remaining: bool, initial_time: TimeMillis) -> bool {
        self.host_callback_scheduled.set(false);
        if self.host_timeout_scheduled.replace(false) {
            // The work loop owns the flow now; the timer is redundant.
            self.host.cancel_host_timeout();
        }

        self.performing_work.set(true);
        let _restore = WorkGuard {
            performing_work: &self.performing_work,
            priority: &self.current_priority,
            previous: self.current_priority.get(),
        };
        self.drain(has_time_remaining, initial_time)
    }

    /// Promote matured delayed tasks into the ready queue, evicting
    /// cancelled ones on the way. Stops at the first task that has not
    /// reached its start time.
    fn advance_timers(&self, current_time: TimeMillis) {
        while let Some(task) = self.delayed.peek() {
            let (cancelled, start_time) = {
                let t = task.borrow();
                (t.is_cancelled(), t.start_time())
            };
            if cancelled {
                self.delayed.pop();
                continue;
            }
            if start_time > current_time {
                return;
            }
            let task = self.delayed.pop().expect("peeked head vanished");
            {
                let mut t = task.borrow_mut();
                let expiration = t.expiration_time();
                t.set_sort_index(expiration);
                t.set_queued(true);
                trace!(id = t.id(), expiration, "delayed task matured");
            }
            self.ready.push(task);
        }
    }

    /// The drain step. Returns true when ready work remains (the host should
    /// grant another slice); otherwise arms the timer for the earliest
    /// delayed task, if any, and returns false.
    fn drain(&self, has_time_remaining: bool, initial_time: TimeMillis) -> bool {
        let mut current_time = initial_time;
        self.advance_timers(current_time);

        loop {
            if self.paused.get() {
                break;
            }
            let Some(task) = self.ready.peek() else {
                break;
            };
            let expiration_time = task.borrow().expiration_time();
            if expiration_time > current_time
                && (!has_time_remaining || self.should_yield_internal(current_time))
            {
                // The head is not overdue and the slice is spent.
                break;
            }

            let callback = task.borrow_mut().take_callback();
            let Some(callback) = callback else {
                // Cancelled while queued; reclaim the slot.
                self.ready.pop();
                task.borrow_mut().set_queued(false);
                continue;
            };

            let (id, priority) = {
                let t = task.borrow();
                (t.id(), t.priority())
            };
            self.current_priority.set(priority);
            let did_timeout = expiration_time <= current_time;
            trace!(id, did_timeout, "run task");

            // The callback slot is already empty, so a panicking callback is
            // consumed, not retried; the guard keeps the queued flag honest.
            let continuation = {
                let mut run = RunGuard {
                    task: &task,
                    completed: false,
                };
                let continuation = callback(did_timeout);
                run.completed = true;
                continuation
            };
            current_time = self.clock.now();

            match continuation {
                Continuation::Continue(next) => {
                    // Same task identity, fresh callback; it keeps its queue
                    // slot and competes again under the same deadline.
                    trace!(id, "continuation");
                    task.borrow_mut().set_callback(next);
                }
                Continuation::Finished => {
                    // The callback may have pushed an earlier-deadline task
                    // past us; only pop if we are still the head.
                    let still_head = self
                        .ready
                        .peek()
                        .is_some_and(|head| Rc::ptr_eq(&head, &task));
                    if still_head {
                        self.ready.pop();
                    }
                    task.borrow_mut().set_queued(false);
                }
            }
            self.advance_timers(current_time);
        }

        if !self.ready.is_empty() {
            true
        } else {
            if let Some(head) = self.delayed.peek() {
                let start_time = head.borrow().start_time();
                self.host_timeout_scheduled.set(true);
                self.host.request_host_timeout(start_time - current_time);
            }
            false
        }
    }

    fn should_yield_internal(&self, now: TimeMillis) -> bool {
        self.budget.should_yield(now, self.host.input_status())
    }
}

/// Restores the ambient priority slot on drop.
struct AmbientPriorityGuard<'a> {
    slot: &'a Cell<Priority>,
    previous: Priority,
}

impl<'a> AmbientPriorityGuard<'a> {
    fn enter(slot: &'a Cell<Priority>, priority: Priority) -> Self {
        let previous = slot.replace(priority);
        Self { slot, previous }
    }
}

impl Drop for AmbientPriorityGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(self.previous);
    }
}

/// Work-loop bookkeeping that must survive an unwinding callback: ambient
/// priority back to its pre-slice value, `performing_work` lowered.
struct WorkGuard<'a> {
    performing_work: &'a Cell<bool>,
    priority: &'a Cell<Priority>,
    previous: Priority,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.priority.set(self.previous);
        self.performing_work.set(false);
    }
}

/// Marks a task as no longer queued if its callback unwinds.
struct RunGuard<'a> {
    task: &'a TaskHandle,
    completed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let mut task = self.task.borrow_mut();
            task.set_queued(false);
            debug!(id = task.id(), "task callback panicked; task consumed");
        }
    }
}

/// End-of-slice duties for `on_host_callback`: clear the paint request and,
/// when more work remains (or the slice unwound), post the next self-message.
struct SliceGuard<'a, H: Host> {
    scheduler: &'a Scheduler<H>,
    rearm: bool,
}

impl<H: Host> Drop for SliceGuard<'_, H> {
    fn drop(&mut self) {
        self.scheduler.budget.clear_paint_request();
        if self.rearm {
            self.scheduler.host_callback_scheduled.set(true);
            self.scheduler.host.request_host_callback();
        }
    }
}
