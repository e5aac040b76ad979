//! `siltop monitor`: the live dashboard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use siltop_core::{SamplerConfig, Supervisor, detect_soc_info, timecode_now};

use crate::tui::app::{App, MonitorConfig};

pub fn run(config: MonitorConfig) {
    let soc = detect_soc_info();
    println!("siltop: {}", super::soc_summary(&soc));
    println!("Starting powermetrics (sudo may ask for your password)...");

    // Start before raw mode so sudo can prompt on a normal terminal.
    let mut supervisor = Supervisor::new(SamplerConfig::default());
    let handle = match supervisor.start(&timecode_now(), config.interval_ms(), config.niceness) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Raw mode turns Ctrl+C into a key press; this catches SIGINT from elsewhere.
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        log::warn!("cannot install Ctrl+C handler: {e}");
    }

    let mut app = App::new(config, soc, supervisor, &handle, interrupted);
    let result = app.run();
    let fatal = app.fatal().map(str::to_string);
    // Drop stops the sampler and removes its output.
    drop(app);

    if let Err(e) = result {
        eprintln!("TUI error: {e}");
        std::process::exit(1);
    }
    if let Some(msg) = fatal {
        eprintln!("Error: {msg}");
        std::process::exit(1);
    }
}
