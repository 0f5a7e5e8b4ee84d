//! Basic mcsched example
//!
//! Registers a couple of client modules, posts normal and priority
//! messages, funnels a legacy command, runs a timer, suspends and resumes,
//! then disables with messages still queued so their flush callbacks run.
//!
//! # Environment Variables
//!
//! - `RUST_LOG=debug` - Log filter (off, error, warn, info, debug, trace)
//! - `MCS_*` - Scheduler configuration, see `SchedulerConfig::from_env`

use mcsched::prelude::*;
use mcsched::{FnHandler, LogStallSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STATS: ModuleId = ModuleId::new(8);
const SCAN: ModuleId = ModuleId::new(9);

static TIMER_FIRED: AtomicUsize = AtomicUsize::new(0);

fn on_timer(msg: &mut Message) -> HandlerResult {
    info!(data = msg.body_val, thread = ?thread::current().name(), "timer fired");
    TIMER_FIRED.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn on_flush(msg: &mut Message) {
    if let Some(count) = msg.body_ref::<Arc<AtomicUsize>>() {
        count.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_idle(sched: &Scheduler) {
    let start = Instant::now();
    while sched.pool_available() < sched.config().pool_capacity {
        if start.elapsed() > Duration::from_secs(5) {
            warn!("timed out waiting for queues to drain");
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

// RUST_LOG=debug cargo run -p mcsched-basic
fn main() -> SchedResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    println!("=== mcsched Basic Example ===\n");

    let config = SchedulerConfig::from_env().pool_capacity(64);
    config.log_summary();
    let sched = Scheduler::with_stall_sink(config, Arc::new(LogStallSink))?;

    sched.register_fn(STATS, "stats", |msg: &mut Message| {
        println!("  [stats] type={} value={}", msg.msg_type, msg.body_val);
        Ok(())
    })?;
    sched.register_fn(SCAN, "scan", |msg: &mut Message| {
        println!("  [scan]  type={} value={}", msg.msg_type, msg.body_val);
        Ok(())
    })?;
    sched.register_legacy_handler(Arc::new(FnHandler::new(
        "legacy",
        |msg: &mut Message| {
            println!("  [legacy] command {:#x}", msg.msg_type);
            Ok(())
        },
    )))?;

    sched.enable()?;
    for (module, qidx) in sched.registered_modules() {
        println!("queue {:2} -> {}", qidx, module);
    }
    println!("controller probe: {:?}", sched.probe(Duration::from_secs(1))?);

    // Suspend so the priority post lands ahead of the queued normal ones
    println!("\nPriority ordering:");
    sched.suspend()?;
    for i in 1..=3 {
        sched.post(STATS, Message::new(1).with_body_val(i), false)?;
    }
    sched.post(STATS, Message::new(2).with_body_val(100), true)?;
    sched.post(SCAN, Message::new(1).with_body_val(7), false)?;
    sched.resume()?;
    wait_idle(&sched);

    println!("\nLegacy funnel:");
    sched.post(ModuleId::LEGACY_WMA, Message::new(0x5001), false)?;
    wait_idle(&sched);

    println!("\nTimer:");
    sched.start_timer(Duration::from_millis(20), on_timer, 42)?;
    let start = Instant::now();
    while TIMER_FIRED.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(5));
    }

    println!("\nDisable with pending messages:");
    let flushed = Arc::new(AtomicUsize::new(0));
    sched.suspend()?;
    for _ in 0..5 {
        sched.post(
            SCAN,
            Message::new(3)
                .with_body(flushed.clone())
                .with_flush_callback(on_flush),
            false,
        )?;
    }
    sched.disable()?;
    println!("  flushed {} message(s)", flushed.load(Ordering::SeqCst));

    match sched.post(STATS, Message::new(1), false) {
        Err(e) => println!("  post after disable: {}", e),
        Ok(()) => warn!("post after disable was accepted"),
    }

    let stats = sched.stats();
    println!(
        "\nposted={} dispatched={} flushed={} redirected={} rejected={}",
        stats.posted,
        stats.dispatched,
        stats.flushed,
        stats.redirected,
        stats.rejected()
    );

    sched.deinit()?;
    println!("\n=== Example Complete ===");
    Ok(())
}
