//! Browser host for the cadence scheduler.
//!
//! Maps the scheduler's host capability onto web platform primitives:
//!
//! - the zero-delay self-message is a `MessageChannel` post, which the
//!   browser delivers as a macrotask, so layout, paint, and input handling
//!   all get a turn between work-loop slices;
//! - the single-slot timer is `setTimeout`/`clearTimeout`;
//! - the clock is `performance.now()`;
//! - input-pending hints come from `navigator.scheduling.isInputPending`
//!   where the browser ships it, feature-detected through reflection.

use cadence_scheduler::{Clock, Host, InputStatus, Scheduler, SchedulerConfig, TimeMillis};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageChannel, MessageEvent, MessagePort, Performance};

/// `performance.now()` as the scheduler's monotonic millisecond clock.
pub struct PerformanceClock {
    performance: Performance,
}

impl PerformanceClock {
    pub fn new() -> Self {
        let performance = web_sys::window()
            .expect("no window")
            .performance()
            .expect("no performance API");
        Self { performance }
    }
}

impl Default for PerformanceClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PerformanceClock {
    fn now(&self) -> TimeMillis {
        self.performance.now() as TimeMillis
    }
}

/// Feature-detected handle to `navigator.scheduling.isInputPending`.
struct InputProbe {
    scheduling: JsValue,
    is_input_pending: js_sys::Function,
    continuous_options: JsValue,
}

impl InputProbe {
    fn detect() -> Option<Self> {
        let navigator = web_sys::window()?.navigator();
        let scheduling = js_sys::Reflect::get(&navigator, &"scheduling".into()).ok()?;
        if scheduling.is_undefined() || scheduling.is_null() {
            return None;
        }
        let is_input_pending = js_sys::Reflect::get(&scheduling, &"isInputPending".into())
            .ok()?
            .dyn_into::<js_sys::Function>()
            .ok()?;

        let continuous_options = js_sys::Object::new();
        js_sys::Reflect::set(
            &continuous_options,
            &"includeContinuous".into(),
            &JsValue::TRUE,
        )
        .ok()?;

        Some(Self {
            scheduling,
            is_input_pending,
            continuous_options: continuous_options.into(),
        })
    }

    fn status(&self) -> Option<InputStatus> {
        // Without options the browser only reports discrete events.
        let discrete = self
            .is_input_pending
            .call0(&self.scheduling)
            .ok()?
            .as_bool()
            .unwrap_or(false);
        if discrete {
            return Some(InputStatus::DiscretePending);
        }
        let any = self
            .is_input_pending
            .call1(&self.scheduling, &self.continuous_options)
            .ok()?
            .as_bool()
            .unwrap_or(false);
        if any {
            Some(InputStatus::ContinuousPending)
        } else {
            Some(InputStatus::Idle)
        }
    }
}

/// Browser implementation of the scheduler's host capability.
///
/// Built in two steps because the scheduler and its host reference each
/// other: [`bootstrap`] constructs both and then [`WebHost::connect`] wires
/// the message and timer deliveries back into the scheduler through a weak
/// reference.
pub struct WebHost {
    post_port: MessagePort,
    recv_port: MessagePort,
    scheduler: RefCell<Weak<Scheduler<WebHost>>>,
    on_message: RefCell<Option<Closure<dyn FnMut(MessageEvent)>>>,
    timeout_handle: Cell<Option<i32>>,
    timeout_closure: RefCell<Option<Closure<dyn FnMut()>>>,
    input_probe: Option<InputProbe>,
}

impl WebHost {
    pub fn new() -> Self {
        let channel = MessageChannel::new().expect("MessageChannel unavailable");
        Self {
            post_port: channel.port2(),
            recv_port: channel.port1(),
            scheduler: RefCell::new(Weak::new()),
            on_message: RefCell::new(None),
            timeout_handle: Cell::new(None),
            timeout_closure: RefCell::new(None),
            input_probe: InputProbe::detect(),
        }
    }

    /// Route self-message delivery into `scheduler`. Must be called once,
    /// before the first task is scheduled.
    pub fn connect(&self, scheduler: &Rc<Scheduler<WebHost>>) {
        *self.scheduler.borrow_mut() = Rc::downgrade(scheduler);

        let weak = Rc::downgrade(scheduler);
        let closure = Closure::wrap(Box::new(move |_event: MessageEvent| {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.on_host_callback();
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        self.recv_port
            .set_onmessage(Some(closure.as_ref().unchecked_ref()));
        // Keep the closure alive for as long as the port may fire.
        *self.on_message.borrow_mut() = Some(closure);
    }
}

impl Default for WebHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for WebHost {
    fn request_host_callback(&self) {
        self.post_port
            .post_message(&JsValue::NULL)
            .expect("postMessage failed");
    }

    fn request_host_timeout(&self, delay: TimeMillis) {
        let weak = self.scheduler.borrow().clone();
        let closure = Closure::wrap(Box::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.on_host_timeout();
            }
        }) as Box<dyn FnMut()>);

        let handle = web_sys::window()
            .expect("no window")
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                delay.max(0) as i32,
            )
            .expect("setTimeout failed");
        self.timeout_handle.set(Some(handle));
        *self.timeout_closure.borrow_mut() = Some(closure);
    }

    fn cancel_host_timeout(&self) {
        if let Some(handle) = self.timeout_handle.take() {
            if let Some(window) = web_sys::window() {
                window.clear_timeout_with_handle(handle);
            }
        }
        self.timeout_closure.borrow_mut().take();
    }

    fn input_status(&self) -> Option<InputStatus> {
        self.input_probe.as_ref().and_then(InputProbe::status)
    }
}

/// Build a scheduler wired to the browser: `MessageChannel` continuations,
/// `setTimeout` timers, `performance.now()` time.
pub fn bootstrap(config: SchedulerConfig) -> Rc<Scheduler<WebHost>> {
    let host = Rc::new(WebHost::new());
    let clock: Rc<dyn Clock> = Rc::new(PerformanceClock::new());
    let scheduler = Rc::new(Scheduler::new(Rc::clone(&host), clock, config));
    host.connect(&scheduler);
    scheduler
}
