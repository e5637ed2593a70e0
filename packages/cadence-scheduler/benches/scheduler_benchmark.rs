use cadence_scheduler::{
    Continuation, ManualClock, ManualHost, Priority, Scheduler, SchedulerConfig,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::rc::Rc;

fn flush(scheduler: &Scheduler<ManualHost>) {
    while scheduler.host().take_callback_request() {
        scheduler.on_host_callback();
    }
}

fn benchmark_schedule_and_flush(c: &mut Criterion) {
    c.bench_function("schedule_and_flush 1000", |b| {
        b.iter(|| {
            let host = Rc::new(ManualHost::new());
            let clock = Rc::new(ManualClock::new());
            let scheduler = Scheduler::new(host, clock, SchedulerConfig::default());
            for _ in 0..1000 {
                scheduler.schedule(Priority::Normal, |_| {
                    black_box(1 + 1);
                    Continuation::Finished
                });
            }
            flush(&scheduler);
        })
    });
}

fn benchmark_mixed_priorities(c: &mut Criterion) {
    let priorities = [
        Priority::Immediate,
        Priority::UserBlocking,
        Priority::Normal,
        Priority::Low,
        Priority::Idle,
    ];
    c.bench_function("mixed_priorities 1000", |b| {
        b.iter(|| {
            let host = Rc::new(ManualHost::new());
            let clock = Rc::new(ManualClock::new());
            let scheduler = Scheduler::new(host, clock, SchedulerConfig::default());
            for i in 0..1000 {
                scheduler.schedule(priorities[i % priorities.len()], |_| {
                    black_box(1 + 1);
                    Continuation::Finished
                });
            }
            flush(&scheduler);
        })
    });
}

criterion_group!(
    benches,
    benchmark_schedule_and_flush,
    benchmark_mixed_priorities
);
criterion_main!(benches);
