use cadence_scheduler::{
    Clock, Continuation, ManualClock, ManualHost, Priority, Scheduler, SchedulerConfig,
};
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

fn fixture() -> (Rc<Scheduler<ManualHost>>, Rc<ManualHost>, Rc<ManualClock>) {
    let host = Rc::new(ManualHost::new());
    let clock = Rc::new(ManualClock::new());
    let scheduler = Rc::new(Scheduler::new(
        Rc::clone(&host),
        Rc::clone(&clock) as Rc<dyn Clock>,
        SchedulerConfig::default(),
    ));
    (scheduler, host, clock)
}

fn pump(scheduler: &Scheduler<ManualHost>) {
    for _ in 0..64 {
        if !scheduler.host().take_callback_request() {
            return;
        }
        scheduler.on_host_callback();
    }
    panic!("scheduler did not go idle");
}

fn log_task(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> impl FnOnce(bool) -> Continuation {
    let log = Rc::clone(log);
    move |_| {
        log.borrow_mut().push(name);
        Continuation::Finished
    }
}

#[test]
fn test_fifo_at_equal_priority() {
    let (scheduler, _, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Normal, log_task(&log, "a"));
    scheduler.schedule(Priority::Normal, log_task(&log, "b"));
    scheduler.schedule(Priority::Normal, log_task(&log, "c"));
    pump(&scheduler);

    assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn test_immediate_runs_before_normal() {
    let (scheduler, _, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Normal, log_task(&log, "normal"));
    scheduler.schedule(Priority::Immediate, log_task(&log, "immediate"));
    pump(&scheduler);

    assert_eq!(*log.borrow(), vec!["immediate", "normal"]);
}

#[test]
fn test_deadline_order_across_all_priorities() {
    let (scheduler, _, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Idle, log_task(&log, "idle"));
    scheduler.schedule(Priority::Low, log_task(&log, "low"));
    scheduler.schedule(Priority::UserBlocking, log_task(&log, "user-blocking"));
    scheduler.schedule(Priority::Normal, log_task(&log, "normal"));
    pump(&scheduler);

    assert_eq!(
        *log.borrow(),
        vec!["user-blocking", "normal", "low", "idle"]
    );
}

#[test]
fn test_immediate_task_reports_timeout() {
    let (scheduler, _, _) = fixture();
    let observed = Rc::new(RefCell::new(Vec::new()));

    for priority in [Priority::Immediate, Priority::Normal] {
        let observed = Rc::clone(&observed);
        scheduler.schedule(priority, move |did_timeout| {
            observed.borrow_mut().push(did_timeout);
            Continuation::Finished
        });
    }
    pump(&scheduler);

    // The Immediate deadline is already past at dispatch; Normal's is not.
    assert_eq!(*observed.borrow(), vec![true, false]);
}

#[test]
fn test_cancelled_task_never_runs() {
    let (scheduler, _, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    let first = scheduler.schedule(Priority::Normal, log_task(&log, "first"));
    scheduler.schedule(Priority::Normal, log_task(&log, "second"));
    scheduler.cancel(&first);
    pump(&scheduler);

    assert_eq!(*log.borrow(), vec!["second"]);
    assert!(first.borrow().is_cancelled());
}

#[test]
fn test_cancel_at_head_right_before_dispatch() {
    let (scheduler, _, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    // The first task cancels the second from inside the work loop, when the
    // second is already queued and about to surface at the head.
    let victim = Rc::new(RefCell::new(None));
    {
        let scheduler2 = Rc::clone(&scheduler);
        let victim = Rc::clone(&victim);
        let log = Rc::clone(&log);
        scheduler.schedule(Priority::Normal, move |_| {
            log.borrow_mut().push("killer");
            let handle = victim.borrow_mut().take().unwrap();
            scheduler2.cancel(&handle);
            Continuation::Finished
        });
    }
    *victim.borrow_mut() = Some(scheduler.schedule(Priority::Normal, log_task(&log, "victim")));
    pump(&scheduler);

    assert_eq!(*log.borrow(), vec!["killer"]);
}

#[test]
fn test_first_ready_task_is_the_next_to_run() {
    let (scheduler, _, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Low, log_task(&log, "low"));
    let urgent = scheduler.schedule(Priority::UserBlocking, log_task(&log, "urgent"));

    let head = scheduler.first_ready_task().unwrap();
    assert_eq!(head.borrow().id(), urgent.borrow().id());

    pump(&scheduler);
    assert_eq!(log.borrow()[0], "urgent");
    assert!(scheduler.first_ready_task().is_none());
}

#[test]
fn test_single_host_callback_for_a_batch() {
    let (scheduler, host, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Normal, log_task(&log, "a"));
    scheduler.schedule(Priority::Normal, log_task(&log, "b"));
    scheduler.schedule(Priority::Normal, log_task(&log, "c"));

    // One self-message serves the whole batch.
    assert_eq!(host.pending_callbacks(), 1);
    pump(&scheduler);
    assert_eq!(host.pending_callbacks(), 0);
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn test_run_with_priority_restores_on_exit() {
    let (scheduler, _, _) = fixture();
    assert_eq!(scheduler.current_priority(), Priority::Normal);

    scheduler.run_with_priority(Priority::UserBlocking, || {
        assert_eq!(scheduler.current_priority(), Priority::UserBlocking);
        scheduler.run_with_priority(Priority::Idle, || {
            assert_eq!(scheduler.current_priority(), Priority::Idle);
        });
        assert_eq!(scheduler.current_priority(), Priority::UserBlocking);
    });
    assert_eq!(scheduler.current_priority(), Priority::Normal);
}

#[test]
fn test_run_with_priority_restores_on_panic() {
    let (scheduler, _, _) = fixture();

    let result = catch_unwind(AssertUnwindSafe(|| {
        scheduler.run_with_priority(Priority::Immediate, || {
            panic!("boom");
        })
    }));

    assert!(result.is_err());
    assert_eq!(scheduler.current_priority(), Priority::Normal);
}

#[test]
fn test_run_in_next_priority_caps_at_normal() {
    let (scheduler, _, _) = fixture();

    scheduler.run_with_priority(Priority::Immediate, || {
        scheduler.run_in_next_priority(|| {
            assert_eq!(scheduler.current_priority(), Priority::Normal);
        });
    });
    scheduler.run_with_priority(Priority::Low, || {
        scheduler.run_in_next_priority(|| {
            assert_eq!(scheduler.current_priority(), Priority::Low);
        });
    });
}

#[test]
fn test_wrap_captures_the_ambient_priority() {
    let (scheduler, _, _) = fixture();

    let wrapped = scheduler.run_with_priority(Priority::UserBlocking, || {
        let scheduler = Rc::clone(&scheduler);
        let inner = Rc::clone(&scheduler);
        scheduler.wrap_in_current_priority(move || inner.current_priority())
    });

    // Invoked later, outside the `run_with_priority` scope.
    assert_eq!(scheduler.current_priority(), Priority::Normal);
    assert_eq!(wrapped(), Priority::UserBlocking);
    assert_eq!(scheduler.current_priority(), Priority::Normal);
}

#[test]
fn test_tasks_scheduled_while_running_keep_submission_order() {
    let (scheduler, _, _) = fixture();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let scheduler2 = Rc::clone(&scheduler);
        let log = Rc::clone(&log);
        scheduler.schedule(Priority::Normal, move |_| {
            log.borrow_mut().push("outer");
            let la = Rc::clone(&log);
            let lb = Rc::clone(&log);
            scheduler2.schedule(Priority::Normal, move |_| {
                la.borrow_mut().push("inner-a");
                Continuation::Finished
            });
            scheduler2.schedule(Priority::Normal, move |_| {
                lb.borrow_mut().push("inner-b");
                Continuation::Finished
            });
            Continuation::Finished
        });
    }
    pump(&scheduler);

    assert_eq!(*log.borrow(), vec!["outer", "inner-a", "inner-b"]);
}
