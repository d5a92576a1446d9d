use geared_timing_wheel::TimingWheel;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    println!("Starting timing wheel simulation...");

    let wheel = TimingWheel::new(Duration::from_millis(1));
    wheel.set_pool_size(1024, 131_072);

    let driver = wheel.clone();
    thread::spawn(move || driver.run_driver());

    let num_timers = 100_000;
    let fired = Arc::new(AtomicUsize::new(0));

    println!("-> Arming {} timers...", num_timers);
    let start_arm = Instant::now();

    // Durations between 1ms and 500ms, plus a handful of far-future timers
    // to exercise the coarse levels.
    let mut handles = Vec::with_capacity(num_timers);
    for i in 0..num_timers {
        let ms = if i % 1000 == 0 {
            3_600_000 // one hour; these get canceled below
        } else {
            (i as u64 % 500) + 1
        };
        let fired = fired.clone();
        handles.push(wheel.start_timer(Duration::from_millis(ms), move || {
            fired.fetch_add(1, Ordering::Relaxed);
        }));
    }

    let arm_time = start_arm.elapsed();
    println!("   Armed {} timers in {:?}", num_timers, arm_time);
    println!(
        "   Rate: {:.2} million arms/sec",
        (num_timers as f64 / arm_time.as_secs_f64()) / 1_000_000.0
    );

    // Cancel every 4th timer plus all the far-future ones.
    let mut canceled = 0;
    for (i, handle) in handles.iter().enumerate() {
        if (i % 4 == 0 || i % 1000 == 0) && handle.cancel() {
            canceled += 1;
        }
    }
    println!("-> Canceled {} timers", canceled);

    let expected = num_timers - canceled;
    println!("-> Waiting for {} timers to fire...", expected);
    let start_fire = Instant::now();
    while fired.load(Ordering::Relaxed) < expected {
        thread::sleep(Duration::from_millis(10));
    }

    println!("   All due timers fired in {:?}", start_fire.elapsed());
    println!("   Fired: {}", fired.load(Ordering::Relaxed));
    println!("   Outstanding: {}", wheel.outstanding());

    println!("\n SUCCESS: The wheel handled the load!");
}
