//! Runs a chunked computation as a continuation chain while user-blocking
//! tasks arrive mid-flight, and prints the interleaving the scheduler picks.

use anyhow::Result;
use cadence_scheduler::{
    Continuation, ManualHost, MonotonicClock, Priority, ScheduleOptions, Scheduler,
    SchedulerConfig,
};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

const CHUNKS: u64 = 8;
const NUMBERS_PER_CHUNK: u64 = 2_000_000;

fn sum_chunk(chunk: u64) -> u64 {
    let start = chunk * NUMBERS_PER_CHUNK;
    (start..start + NUMBERS_PER_CHUNK).map(|n| n % 7).sum()
}

fn schedule_chunk(scheduler: &Rc<Scheduler<ManualHost>>, chunk: u64, acc: u64) {
    let scheduler2 = Rc::clone(scheduler);
    scheduler.schedule(Priority::Normal, move |_| run_chunk(scheduler2, chunk, acc));
}

fn run_chunk(scheduler: Rc<Scheduler<ManualHost>>, chunk: u64, acc: u64) -> Continuation {
    let acc = acc + sum_chunk(chunk);
    println!("  chunk {}/{} done (acc = {acc})", chunk + 1, CHUNKS);
    if chunk + 1 == CHUNKS {
        println!("computation finished: {acc}");
        return Continuation::Finished;
    }
    Continuation::again(move |_| run_chunk(scheduler, chunk + 1, acc))
}

/// Deliver self-messages and timer firings until the scheduler goes idle.
fn drive(scheduler: &Rc<Scheduler<ManualHost>>) {
    loop {
        while scheduler.host().take_callback_request() {
            scheduler.on_host_callback();
        }
        match scheduler.host().take_timeout() {
            Some(delay) => {
                thread::sleep(Duration::from_millis(delay.max(0) as u64));
                scheduler.on_host_timeout();
            }
            None => return,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let host = Rc::new(ManualHost::new());
    let clock = Rc::new(MonotonicClock::new());
    let scheduler = Rc::new(Scheduler::new(host, clock, SchedulerConfig::default()));

    schedule_chunk(&scheduler, 0, 0);

    // Urgent work lands while the computation is in flight; the deadline
    // order lets it cut ahead of the remaining chunks.
    for (delay, label) in [(5, "saved draft"), (25, "applied keystroke")] {
        scheduler.schedule_with(
            Priority::UserBlocking,
            move |did_timeout| {
                println!("! {label} (overdue: {did_timeout})");
                Continuation::Finished
            },
            ScheduleOptions { delay },
        );
    }

    drive(&scheduler);
    Ok(())
}
