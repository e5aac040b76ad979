//! `siltop snapshot`: one reading as JSON.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use siltop_core::{
    MetricsSnapshot, Poll, RecordReader, SamplerConfig, Supervisor, detect_soc_info, normalize,
    timecode_now,
};

use super::print_json;

enum Outcome {
    Reading(Box<MetricsSnapshot>),
    Interrupted,
    TimedOut,
    SamplerExited,
}

pub fn run(timeout_secs: u64, interval_ms: u64, niceness: i32) {
    let soc = detect_soc_info();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
        eprintln!("Warning: cannot install Ctrl+C handler: {e}");
    }

    let mut supervisor = Supervisor::new(SamplerConfig::default());
    let handle = match supervisor.start(&timecode_now(), interval_ms, niceness) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let mut reader = RecordReader::new(&handle.path);
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Outcome::Interrupted;
        }
        match reader.poll() {
            Poll::Fresh(record) => {
                break Outcome::Reading(Box::new(normalize(&record, &soc.capability)));
            }
            Poll::Unavailable(e) => log::debug!("waiting for first frame: {e}"),
            Poll::Unchanged => {}
        }
        if !supervisor.is_running() {
            break Outcome::SamplerExited;
        }
        if Instant::now() >= deadline {
            break Outcome::TimedOut;
        }
        std::thread::sleep(Duration::from_millis(100));
    };

    // Tear down before printing or exiting; `process::exit` skips destructors.
    supervisor.shutdown();

    match outcome {
        Outcome::Reading(snapshot) => print_json(&snapshot),
        Outcome::Interrupted => {
            eprintln!("Interrupted before the first reading");
            std::process::exit(1);
        }
        Outcome::TimedOut => {
            eprintln!("Error: no reading within {timeout_secs}s");
            std::process::exit(1);
        }
        Outcome::SamplerExited => {
            eprintln!("Error: sampler exited before producing a reading");
            std::process::exit(1);
        }
    }
}
