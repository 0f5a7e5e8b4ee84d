//! Stress test - many producers, one controller
//!
//! Floods the scheduler from several threads against a small envelope
//! pool, then checks per-producer ordering and that every envelope came
//! back once the queues drained.
//!
//! Usage: `stress [producers] [posts_per_producer] [pool_capacity]`

use mcsched::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SINK: ModuleId = ModuleId::new(16);

fn arg(n: usize, default: usize) -> usize {
    std::env::args()
        .nth(n)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn main() -> SchedResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== mcsched Stress Test ===\n");

    let producers = arg(1, 8);
    let per_producer = arg(2, 100_000);
    let capacity = arg(3, 4000);
    let total = producers * per_producer;

    let config = SchedulerConfig::from_env().pool_capacity(capacity);
    let sched = Arc::new(Scheduler::init(config)?);

    // Last value seen from each producer, to check FIFO per producer
    let last_seen = Arc::new(Mutex::new(vec![None::<u32>; producers]));
    let out_of_order = Arc::new(AtomicU64::new(0));
    let handled = Arc::new(AtomicU64::new(0));
    {
        let last_seen = last_seen.clone();
        let out_of_order = out_of_order.clone();
        let handled = handled.clone();
        sched.register_fn(SINK, "sink", move |msg: &mut Message| {
            let producer = msg.msg_type as usize;
            let mut seen = last_seen.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(prev) = seen[producer] {
                if msg.body_val <= prev {
                    out_of_order.fetch_add(1, Ordering::Relaxed);
                }
            }
            seen[producer] = Some(msg.body_val);
            handled.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })?;
    }
    sched.enable()?;

    println!(
        "{} producers x {} posts, pool capacity {}",
        producers, per_producer, capacity
    );

    let start = Instant::now();
    let retries = Arc::new(AtomicU64::new(0));
    let threads: Vec<_> = (0..producers)
        .map(|p| {
            let sched = sched.clone();
            let retries = retries.clone();
            thread::spawn(move || {
                for i in 0..per_producer as u32 {
                    loop {
                        let msg = Message::new(p as u16).with_body_val(i);
                        match sched.post(SINK, msg, false) {
                            Ok(()) => break,
                            Err(SchedError::Resources) => {
                                retries.fetch_add(1, Ordering::Relaxed);
                                thread::sleep(Duration::from_micros(20));
                            }
                            Err(e) => {
                                error!(producer = p, error = %e, "post failed");
                                return;
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for t in threads {
        if t.join().is_err() {
            error!("producer thread panicked");
        }
    }
    let post_time = start.elapsed();

    while handled.load(Ordering::Relaxed) < total as u64 {
        if start.elapsed() > Duration::from_secs(60) {
            println!("Timeout! Only {}/{} handled", handled.load(Ordering::Relaxed), total);
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let total_time = start.elapsed();

    let stats = sched.stats();
    let pool = sched.pool_stats();
    info!(?stats, "final counters");

    println!("\n=== Results ===");
    println!("Posted:          {}", stats.posted);
    println!("Handled:         {}", handled.load(Ordering::Relaxed));
    println!("Out of order:    {}", out_of_order.load(Ordering::Relaxed));
    println!("Pool retries:    {}", retries.load(Ordering::Relaxed));
    println!("Pool recoveries: {}", pool.recoveries);
    println!("Post time:       {:?}", post_time);
    println!("Total time:      {:?}", total_time);
    println!(
        "Throughput:      {:.0} msgs/sec",
        total as f64 / total_time.as_secs_f64()
    );

    sched.disable()?;
    println!("Pool available:  {}/{}", sched.pool_available(), capacity);

    println!("\n=== Stress Test Complete ===");
    Ok(())
}
