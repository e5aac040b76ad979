//! `siltop inspect`: decode an existing powermetrics capture without privileges.

use std::path::Path;

use siltop_core::{Unavailable, detect_soc_info, lookup, normalize, read_latest};

use super::print_json;

pub fn run(path: &Path, chip: Option<&str>) {
    let capability = match chip {
        Some(name) => lookup(name),
        None => detect_soc_info().capability,
    };
    if capability.is_default() {
        log::info!("using fallback ceilings for {}", chip.unwrap_or("this machine"));
    }

    match read_latest(path) {
        Ok(record) => print_json(&normalize(&record, &capability)),
        Err(Unavailable::Missing) => {
            eprintln!("Error: {} does not exist", path.display());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("No complete frame in {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}
