//! Static hardware inventory: chip name, core counts, ceilings.
//!
//! Values come from `sysctl` and `system_profiler` text output. Anything
//! that cannot be read is left as `None` rather than guessed.

use std::collections::HashMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::capability::{CapabilityEntry, lookup_for_cores};

const BRAND_KEY: &str = "machdep.cpu.brand_string";
const CORE_COUNT_KEY: &str = "machdep.cpu.core_count";
const P_CORES_KEY: &str = "hw.perflevel0.logicalcpu";
const E_CORES_KEY: &str = "hw.perflevel1.logicalcpu";

/// Detected system-on-chip description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocInfo {
    pub name: String,
    pub core_count: Option<usize>,
    pub e_core_count: Option<usize>,
    pub p_core_count: Option<usize>,
    pub gpu_core_count: Option<usize>,
    pub capability: CapabilityEntry,
}

impl SocInfo {
    /// Assemble from already-parsed inventory values.
    pub fn from_fields(fields: &HashMap<String, String>, gpu_core_count: Option<usize>) -> Self {
        let name = fields
            .get(BRAND_KEY)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string());
        let count = |key: &str| fields.get(key).and_then(|v| v.parse::<usize>().ok());
        let core_count = count(CORE_COUNT_KEY);
        Self {
            capability: lookup_for_cores(&name, core_count),
            name,
            core_count,
            e_core_count: count(E_CORES_KEY),
            p_core_count: count(P_CORES_KEY),
            gpu_core_count,
        }
    }
}

/// Query the host. Best-effort: never fails, unknown values are `None`.
pub fn detect_soc_info() -> SocInfo {
    let fields = run_command("sysctl", &["-a"])
        .map(|out| parse_sysctl_fields(&out, &[BRAND_KEY, CORE_COUNT_KEY, P_CORES_KEY, E_CORES_KEY]))
        .unwrap_or_default();
    let gpu_cores = run_command(
        "system_profiler",
        &["-detailLevel", "basic", "SPDisplaysDataType"],
    )
    .and_then(|out| parse_gpu_core_count(&out));
    let info = SocInfo::from_fields(&fields, gpu_cores);
    if info.capability.is_default() {
        log::info!("no capability entry for {:?}, using defaults", info.name);
    }
    info
}

/// Extract `key: value` lines for the requested keys from `sysctl -a` output.
pub fn parse_sysctl_fields(output: &str, keys: &[&str]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if keys.contains(&key) {
            fields.insert(key.to_string(), value.trim().to_string());
        }
    }
    fields
}

/// Parse "Total Number of Cores: N" from `system_profiler SPDisplaysDataType`.
pub fn parse_gpu_core_count(output: &str) -> Option<usize> {
    output
        .lines()
        .find(|l| l.contains("Total Number of Cores"))
        .and_then(|l| l.rsplit(':').next())
        .and_then(|v| v.trim().parse().ok())
}

/// Run a command with a short timeout and return trimmed stdout on success.
fn run_command(cmd: &str, args: &[&str]) -> Option<String> {
    const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    // Drain stdout on a helper thread; `sysctl -a` can exceed the pipe buffer.
    let mut stdout = child.stdout.take()?;
    let reader = std::thread::spawn(move || {
        let mut out = Vec::new();
        let _ = stdout.read_to_end(&mut out);
        out
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if start.elapsed() >= COMMAND_TIMEOUT => {
                log::warn!("{cmd} timed out after {COMMAND_TIMEOUT:?}");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(_) => return None,
        }
    };
    let out = reader.join().ok()?;
    if !status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&out).trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}
